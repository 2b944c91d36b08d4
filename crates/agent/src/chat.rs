use std::sync::Arc;
use tabrelay_core::Result;
use tabrelay_storage::{RateLimiter, RecordParams};
use tracing::{debug, info};

use crate::session::{SessionConfig, SessionManager};

/// Provider label recorded for turns served by the configured default.
pub const DEFAULT_PROVIDER_LABEL: &str = "default";

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub conversation_id: String,
    pub message: String,
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// One chat turn: quota gate, session lookup, agent execution.
pub struct ChatService {
    sessions: Arc<SessionManager>,
    rate_limiter: Option<RateLimiter>,
    identity_id: String,
}

impl ChatService {
    /// `rate_limiter` is `None` when quotas are disabled.
    pub fn new(
        sessions: Arc<SessionManager>,
        rate_limiter: Option<RateLimiter>,
        identity_id: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            rate_limiter,
            identity_id: identity_id.into(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn identity_id(&self) -> &str {
        &self.identity_id
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<String> {
        self.enforce_quota(&request)?;

        let session = self
            .sessions
            .get_or_create(&SessionConfig {
                conversation_id: request.conversation_id.clone(),
                provider: request.provider.clone(),
                model: request.model.clone(),
            })
            .await?;

        info!(
            conversation_id = %request.conversation_id,
            message_len = request.message.len(),
            "Chat turn started"
        );
        let result = session.agent().execute(&request.message).await;
        session.touch();
        result
    }

    /// Every conversation runs on a server-configured key, so every one is
    /// metered. A conversation already recorded in the database is never
    /// checked again, even after its session was deleted or evicted.
    fn enforce_quota(&self, request: &ChatRequest) -> Result<()> {
        let Some(limiter) = &self.rate_limiter else {
            return Ok(());
        };
        if limiter.is_recorded(&request.conversation_id)? {
            debug!(conversation_id = %request.conversation_id, "Conversation already counted");
            return Ok(());
        }
        limiter.check(&self.identity_id)?;
        limiter.record(RecordParams {
            conversation_id: request.conversation_id.clone(),
            identity_id: self.identity_id.clone(),
            provider: request
                .provider
                .clone()
                .unwrap_or_else(|| DEFAULT_PROVIDER_LABEL.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::*;
    use crate::agent::BrowserAgent;
    use tabrelay_core::Error;
    use tabrelay_storage::Database;
    use tempfile::TempDir;

    fn service(dir: &TempDir, limit: u32) -> ChatService {
        let sessions = Arc::new(SessionManager::new(|config: &SessionConfig| {
            Ok(BrowserAgent::new(
                &config.conversation_id,
                ScriptedProvider::new(vec![]),
                Arc::new(RecordingExecutor::default()),
                vec![],
                fast_settings(),
            ))
        }));
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        ChatService::new(sessions, Some(RateLimiter::new(db, limit)), "install-1")
    }

    fn request(conversation_id: &str) -> ChatRequest {
        ChatRequest {
            conversation_id: conversation_id.to_string(),
            message: "hello".to_string(),
            provider: None,
            model: None,
        }
    }

    #[tokio::test]
    async fn test_new_conversations_hit_the_limit() {
        let dir = TempDir::new().unwrap();
        let chat = service(&dir, 2);

        assert_eq!(chat.chat(request("a")).await.unwrap(), "fallback");
        chat.chat(request("b")).await.unwrap();
        let err = chat.chat(request("c")).await.unwrap_err();
        assert!(matches!(err, Error::RateLimitExceeded { used: 2, limit: 2 }));
        assert!(!chat.sessions().has("c"));
    }

    #[tokio::test]
    async fn test_existing_conversation_continues_past_limit() {
        let dir = TempDir::new().unwrap();
        let chat = service(&dir, 1);

        chat.chat(request("a")).await.unwrap();
        chat.chat(request("a")).await.unwrap();
        assert!(chat.chat(request("b")).await.is_err());
    }

    #[tokio::test]
    async fn test_named_provider_is_metered() {
        let dir = TempDir::new().unwrap();
        let chat = service(&dir, 1);

        let mut served = 0;
        for i in 0..10 {
            let mut req = request(&format!("conv-{}", i));
            req.provider = Some("openai".to_string());
            if chat.chat(req).await.is_ok() {
                served += 1;
            }
        }
        assert_eq!(served, 1);
        assert!(matches!(
            chat.chat(request("default-conv")).await,
            Err(Error::RateLimitExceeded { used: 1, limit: 1 })
        ));
    }

    #[tokio::test]
    async fn test_counted_conversation_resumes_after_delete() {
        let dir = TempDir::new().unwrap();
        let chat = service(&dir, 1);

        chat.chat(request("a")).await.unwrap();
        assert!(chat.sessions().delete("a"));
        assert!(chat.chat(request("a")).await.is_ok());
        assert!(chat.sessions().has("a"));
        assert!(chat.chat(request("b")).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_quota() {
        let sessions = Arc::new(SessionManager::new(|config: &SessionConfig| {
            Ok(BrowserAgent::new(
                &config.conversation_id,
                ScriptedProvider::new(vec![]),
                Arc::new(RecordingExecutor::default()),
                vec![],
                fast_settings(),
            ))
        }));
        let chat = ChatService::new(sessions, None, "install-1");
        for id in ["a", "b", "c"] {
            chat.chat(request(id)).await.unwrap();
        }
        assert_eq!(chat.sessions().count(), 3);
    }
}
