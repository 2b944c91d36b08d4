pub mod actions;
pub mod browser;
pub mod registry;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tabrelay_core::{Error, Result};

pub use actions::{builtin_schemas, register_builtin_actions};
pub use registry::ActionRegistry;

pub struct ActionSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

impl ActionSchema {
    /// OpenAI-compatible function tool definition.
    pub fn to_tool_json(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters
            }
        })
    }
}

/// A named operation executed against the browser.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn schema(&self) -> ActionSchema;

    /// Rejects malformed payloads before `execute` runs.
    fn validate(&self, payload: &Value) -> Result<()>;

    async fn execute(&self, payload: Value) -> Result<Value>;
}

/// Deserializes an action payload, treating a missing payload as `{}`.
pub fn parse_input<T: DeserializeOwned>(payload: &Value) -> Result<T> {
    let payload = if payload.is_null() { json!({}) } else { payload.clone() };
    serde_json::from_value(payload).map_err(|e| Error::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Input {
        tab_id: i64,
        #[serde(default)]
        clear: bool,
    }

    #[test]
    fn test_parse_input_ok() {
        let input: Input = parse_input(&json!({"tabId": 3})).unwrap();
        assert_eq!(input.tab_id, 3);
        assert!(!input.clear);
    }

    #[test]
    fn test_parse_input_missing_field() {
        let err = parse_input::<Input>(&Value::Null).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("tabId")));
    }
}
