pub mod db;
pub mod identity;
pub mod rate_limiter;

pub use db::Database;
pub use identity::IdentityService;
pub use rate_limiter::{RateLimiter, RecordParams, DEFAULT_DAILY_RATE_LIMIT};
