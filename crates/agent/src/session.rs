//! Per-conversation agent pooling.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tabrelay_core::{Error, Result};
use tracing::{debug, info};

use crate::agent::BrowserAgent;

/// What a session is created from.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub conversation_id: String,
    pub provider: Option<String>,
    pub model: Option<String>,
}

impl SessionConfig {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            provider: None,
            model: None,
        }
    }
}

pub type AgentFactory = dyn Fn(&SessionConfig) -> Result<BrowserAgent> + Send + Sync;

pub struct AgentSession {
    agent: BrowserAgent,
    created_at: DateTime<Utc>,
    last_used: Mutex<Instant>,
}

impl AgentSession {
    fn new(agent: BrowserAgent) -> Self {
        Self {
            agent,
            created_at: Utc::now(),
            last_used: Mutex::new(Instant::now()),
        }
    }

    pub fn agent(&self) -> &BrowserAgent {
        &self.agent
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<AgentSession>>>,
    factory: Box<AgentFactory>,
}

impl SessionManager {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&SessionConfig) -> Result<BrowserAgent> + Send + Sync + 'static,
    {
        Self {
            sessions: Mutex::new(HashMap::new()),
            factory: Box::new(factory),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<AgentSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the conversation's session, creating it on first use.
    pub async fn get_or_create(&self, config: &SessionConfig) -> Result<Arc<AgentSession>> {
        let existing = self.sessions().get(&config.conversation_id).cloned();
        if let Some(session) = existing {
            session.touch();
            // A running turn holds the history lock; never wait on it here.
            info!(
                conversation_id = %config.conversation_id,
                history_len = ?session.agent().try_history_len(),
                "Reusing session"
            );
            return Ok(session);
        }

        let mut sessions = self.sessions();
        // Another caller may have created it while we were not holding the lock.
        if let Some(session) = sessions.get(&config.conversation_id) {
            session.touch();
            return Ok(session.clone());
        }
        let agent = (self.factory)(config)?;
        let session = Arc::new(AgentSession::new(agent));
        sessions.insert(config.conversation_id.clone(), session.clone());
        info!(
            conversation_id = %config.conversation_id,
            provider = config.provider.as_deref().unwrap_or("default"),
            total = sessions.len(),
            "Session created"
        );
        Ok(session)
    }

    pub fn get(&self, conversation_id: &str) -> Option<Arc<AgentSession>> {
        self.sessions().get(conversation_id).cloned()
    }

    /// Like [`get`](Self::get) but fails with `SessionNotFound`.
    pub fn require(&self, conversation_id: &str) -> Result<Arc<AgentSession>> {
        self.get(conversation_id)
            .ok_or_else(|| Error::SessionNotFound(conversation_id.to_string()))
    }

    pub fn delete(&self, conversation_id: &str) -> bool {
        let removed = self.sessions().remove(conversation_id).is_some();
        if removed {
            info!(conversation_id, "Session deleted");
        }
        removed
    }

    pub fn has(&self, conversation_id: &str) -> bool {
        self.sessions().contains_key(conversation_id)
    }

    pub fn count(&self) -> usize {
        self.sessions().len()
    }

    /// Drops sessions idle for longer than `ttl`. Sessions still referenced
    /// elsewhere (a turn in progress) are kept.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|id, session| {
            let keep = Arc::strong_count(session) > 1 || session.idle_for() <= ttl;
            if !keep {
                debug!(conversation_id = %id, "Evicting idle session");
            }
            keep
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }
}
