use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Validation error: Duplicate request ID: {0}. Already processing this request.")]
    DuplicateRequest(String),

    #[error("Unknown action: \"{name}\". Available actions: {available}")]
    UnknownAction { name: String, available: String },

    #[error("Action execution failed: {0}")]
    HandlerExecution(String),

    #[error("Controller overloaded. Queue full ({capacity} requests). Server should slow down.")]
    Overloaded { capacity: usize },

    #[error("Daily limit reached ({used}/{limit}). Add your own API key for unlimited usage.")]
    RateLimitExceeded { used: u32, limit: u32 },

    #[error("Session \"{0}\" not found.")]
    SessionNotFound(String),

    #[error("Controller not connected: {0}")]
    NotConnected(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status the gateway reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_)
            | Error::DuplicateRequest(_)
            | Error::Json(_)
            | Error::UnknownAction { .. } => 400,
            Error::SessionNotFound(_) => 404,
            Error::RateLimitExceeded { .. } => 429,
            Error::Overloaded { .. } | Error::NotConnected(_) => 503,
            Error::Timeout(_) => 504,
            _ => 500,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) | Error::Validation(_) | Error::DuplicateRequest(_) => "VALIDATION_ERROR",
            Error::UnknownAction { .. } => "UNKNOWN_ACTION",
            Error::HandlerExecution(_) => "HANDLER_EXECUTION_ERROR",
            Error::Overloaded { .. } => "OVERLOADED",
            Error::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Error::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Error::NotConnected(_) => "NOT_CONNECTED",
            Error::Timeout(_) => "TIMEOUT",
            Error::Transport(_) => "TRANSPORT_ERROR",
            Error::Provider(_) => "AGENT_EXECUTION_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Short type name used in error bodies.
    pub fn name(&self) -> &'static str {
        match self {
            Error::Json(_) | Error::Validation(_) | Error::DuplicateRequest(_) => "ValidationError",
            Error::UnknownAction { .. } => "UnknownActionError",
            Error::HandlerExecution(_) => "HandlerExecutionError",
            Error::Overloaded { .. } => "OverloadError",
            Error::RateLimitExceeded { .. } => "RateLimitError",
            Error::SessionNotFound(_) => "SessionNotFoundError",
            Error::Provider(_) => "AgentExecutionError",
            _ => "Error",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_error_shape() {
        let err = Error::RateLimitExceeded { used: 5, limit: 5 };
        assert_eq!(err.status_code(), 429);
        assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");
        assert!(err.to_string().starts_with("Daily limit reached (5/5)"));
    }

    #[test]
    fn test_overload_message() {
        let err = Error::Overloaded { capacity: 1000 };
        assert_eq!(
            err.to_string(),
            "Controller overloaded. Queue full (1000 requests). Server should slow down."
        );
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_duplicate_is_a_validation_error() {
        let err = Error::DuplicateRequest("r1".to_string());
        assert_eq!(
            err.to_string(),
            "Validation error: Duplicate request ID: r1. Already processing this request."
        );
        assert_eq!(err.name(), "ValidationError");
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_session_not_found() {
        let err = Error::SessionNotFound("abc".to_string());
        assert_eq!(err.to_string(), "Session \"abc\" not found.");
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.name(), "SessionNotFoundError");
    }
}
