use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tabrelay_core::{ActionResponse, Error};
use tracing::{debug, info, warn};

use crate::ActionHandler;

/// Name to handler dispatch table. `dispatch` is total: every name yields a
/// response, never an error or a panic.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn ActionHandler>>> {
        self.handlers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn ActionHandler>>> {
        self.handlers.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers under the handler's schema name. An existing entry is replaced.
    pub fn register(&self, handler: Arc<dyn ActionHandler>) {
        let name = handler.schema().name.to_string();
        self.register_as(&name, handler);
    }

    pub fn register_as(&self, name: &str, handler: Arc<dyn ActionHandler>) {
        if self.write().insert(name.to_string(), handler).is_some() {
            warn!(action = %name, "Action already registered, overwriting");
        }
        info!(action = %name, "Registered action");
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.write().remove(name).is_some();
        if removed {
            debug!(action = %name, "Unregistered action");
        }
        removed
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn available_actions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn action_count(&self) -> usize {
        self.read().len()
    }

    /// OpenAI-compatible tool definitions for every registered action.
    pub fn tool_schemas(&self) -> Vec<Value> {
        let handlers: Vec<Arc<dyn ActionHandler>> = self.read().values().cloned().collect();
        let mut schemas: Vec<_> = handlers.iter().map(|h| h.schema()).collect();
        schemas.sort_by_key(|s| s.name);
        schemas.iter().map(|s| s.to_tool_json()).collect()
    }

    pub async fn dispatch(&self, name: &str, payload: Value) -> ActionResponse {
        let handler = self.read().get(name).cloned();
        let Some(handler) = handler else {
            let available = self.available_actions();
            warn!(action = %name, "Unknown action requested");
            let err = Error::UnknownAction {
                name: name.to_string(),
                available: if available.is_empty() {
                    "none".to_string()
                } else {
                    available.join(", ")
                },
            };
            return ActionResponse::failure(err.to_string());
        };

        if let Err(e) = handler.validate(&payload) {
            debug!(action = %name, error = %e, "Action payload rejected");
            return ActionResponse::failure(e.to_string());
        }

        debug!(action = %name, "Executing action");
        match AssertUnwindSafe(handler.execute(payload)).catch_unwind().await {
            Ok(Ok(data)) => ActionResponse::success(data),
            Ok(Err(e)) => {
                warn!(action = %name, error = %e, "Action failed");
                ActionResponse::failure(Error::HandlerExecution(e.to_string()).to_string())
            }
            Err(_) => {
                warn!(action = %name, "Action handler panicked");
                ActionResponse::failure(Error::HandlerExecution("handler panicked".to_string()).to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_input, ActionSchema};
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use tabrelay_core::Result;

    struct Echo(&'static str);

    #[async_trait]
    impl ActionHandler for Echo {
        fn schema(&self) -> ActionSchema {
            ActionSchema {
                name: self.0,
                description: "echo",
                parameters: json!({"type": "object"}),
            }
        }

        fn validate(&self, _payload: &Value) -> Result<()> {
            Ok(())
        }

        async fn execute(&self, payload: Value) -> Result<Value> {
            Ok(json!({"from": self.0, "payload": payload}))
        }
    }

    struct Failing;

    #[async_trait]
    impl ActionHandler for Failing {
        fn schema(&self) -> ActionSchema {
            ActionSchema {
                name: "failing",
                description: "always fails",
                parameters: json!({"type": "object"}),
            }
        }

        fn validate(&self, _payload: &Value) -> Result<()> {
            Ok(())
        }

        async fn execute(&self, _payload: Value) -> Result<Value> {
            Err(Error::Other("element not found".to_string()))
        }
    }

    #[derive(Deserialize)]
    #[allow(dead_code)]
    struct NeedsUrl {
        url: String,
    }

    struct Strict;

    #[async_trait]
    impl ActionHandler for Strict {
        fn schema(&self) -> ActionSchema {
            ActionSchema {
                name: "strict",
                description: "requires url",
                parameters: json!({"type": "object"}),
            }
        }

        fn validate(&self, payload: &Value) -> Result<()> {
            parse_input::<NeedsUrl>(payload).map(|_| ())
        }

        async fn execute(&self, _payload: Value) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_dispatch_registered() {
        let reg = ActionRegistry::new();
        reg.register(Arc::new(Echo("a")));
        let resp = reg.dispatch("a", json!({"x": 1})).await;
        assert!(resp.is_ok());
        assert_eq!(resp.data().unwrap()["payload"]["x"], 1);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_lists_available() {
        let reg = ActionRegistry::new();
        reg.register(Arc::new(Echo("b")));
        reg.register(Arc::new(Echo("a")));
        let resp = reg.dispatch("c", Value::Null).await;
        assert!(!resp.is_ok());
        let err = resp.error().unwrap();
        assert!(err.starts_with("Unknown action: \"c\""));
        assert!(err.contains("a, b"));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_on_empty_registry() {
        let reg = ActionRegistry::new();
        let resp = reg.dispatch("anything", Value::Null).await;
        assert!(resp.error().unwrap().ends_with("Available actions: none"));
    }

    #[tokio::test]
    async fn test_handler_error_is_wrapped() {
        let reg = ActionRegistry::new();
        reg.register(Arc::new(Failing));
        let resp = reg.dispatch("failing", Value::Null).await;
        assert_eq!(resp.error(), Some("Action execution failed: element not found"));
    }

    #[tokio::test]
    async fn test_validation_error_response() {
        let reg = ActionRegistry::new();
        reg.register(Arc::new(Strict));
        let resp = reg.dispatch("strict", json!({})).await;
        let err = resp.error().unwrap();
        assert!(err.starts_with("Validation error:"));
        assert!(err.contains("url"));
    }

    #[tokio::test]
    async fn test_overwrite_keeps_single_entry() {
        let reg = ActionRegistry::new();
        reg.register_as("x", Arc::new(Echo("first")));
        reg.register_as("x", Arc::new(Echo("second")));
        assert_eq!(reg.action_count(), 1);
        let resp = reg.dispatch("x", Value::Null).await;
        assert_eq!(resp.data().unwrap()["from"], "second");
    }

    #[test]
    fn test_introspection() {
        let reg = ActionRegistry::new();
        reg.register(Arc::new(Echo("b")));
        reg.register(Arc::new(Echo("a")));
        assert!(reg.has_action("a"));
        assert_eq!(reg.available_actions(), vec!["a", "b"]);
        assert_eq!(reg.tool_schemas()[0]["function"]["name"], "a");

        assert!(reg.unregister("a"));
        assert!(!reg.unregister("a"));
        assert_eq!(reg.action_count(), 1);

        reg.clear();
        assert_eq!(reg.action_count(), 0);
    }
}
