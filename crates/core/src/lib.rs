pub mod config;
pub mod error;
pub mod paths;
pub mod protocol;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use paths::Paths;
pub use protocol::{ActionResponse, ProtocolRequest, ProtocolResponse};
