pub mod agent;
pub mod bridge;
pub mod chat;
pub mod session;

pub use agent::{ActionExecutor, AgentSettings, BrowserAgent};
pub use bridge::ControllerBridge;
pub use chat::{ChatRequest, ChatService};
pub use session::{AgentSession, SessionConfig, SessionManager};
