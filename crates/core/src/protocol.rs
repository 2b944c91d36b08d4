//! Wire envelopes exchanged between the agent side and the browser controller.
//!
//! Request: `{"id": "<uuid>", "action": "<name>", "payload": <any>}`
//! Response: `{"id": "<uuid>", "ok": true, "data": <any>}` or
//! `{"id": "<uuid>", "ok": false, "error": "<message>"}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolRequest {
    pub id: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl ProtocolRequest {
    pub fn new(id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            payload,
        }
    }
}

/// Result of dispatching one action. `ok == true` never carries an error and
/// `ok == false` always does; the fields are private so that holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOutcome", into = "RawOutcome")]
pub struct ActionResponse {
    ok: bool,
    data: Option<Value>,
    error: Option<String>,
}

impl ActionResponse {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn into_result(self) -> std::result::Result<Value, String> {
        if self.ok {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(self.error.unwrap_or_default())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolResponse {
    pub id: String,
    #[serde(flatten)]
    pub outcome: ActionResponse,
}

impl ProtocolResponse {
    pub fn new(id: impl Into<String>, outcome: ActionResponse) -> Self {
        Self {
            id: id.into(),
            outcome,
        }
    }

    pub fn success(id: impl Into<String>, data: Value) -> Self {
        Self::new(id, ActionResponse::success(data))
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(id, ActionResponse::failure(error))
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Serialize, Deserialize)]
struct RawOutcome {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl TryFrom<RawOutcome> for ActionResponse {
    type Error = String;

    fn try_from(raw: RawOutcome) -> std::result::Result<Self, Self::Error> {
        match (raw.ok, raw.error) {
            (true, Some(_)) => Err("ok response must not carry an error".to_string()),
            (false, None) => Err("failed response must carry an error".to_string()),
            (ok, error) => Ok(Self {
                ok,
                data: raw.data,
                error,
            }),
        }
    }
}

impl From<ActionResponse> for RawOutcome {
    fn from(resp: ActionResponse) -> Self {
        Self {
            ok: resp.ok,
            data: resp.data,
            error: resp.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_wire_shape() {
        let resp = ProtocolResponse::success("r1", json!({"tabs": []}));
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v, json!({"id": "r1", "ok": true, "data": {"tabs": []}}));
    }

    #[test]
    fn test_failure_wire_shape() {
        let resp = ProtocolResponse::failure("r2", "boom");
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v, json!({"id": "r2", "ok": false, "error": "boom"}));
    }

    #[test]
    fn test_rejects_inconsistent_outcome() {
        let bad_ok: std::result::Result<ProtocolResponse, _> =
            serde_json::from_value(json!({"id": "x", "ok": true, "error": "nope"}));
        assert!(bad_ok.is_err());

        let bad_fail: std::result::Result<ProtocolResponse, _> =
            serde_json::from_value(json!({"id": "x", "ok": false}));
        assert!(bad_fail.is_err());
    }

    #[test]
    fn test_request_payload_optional() {
        let req: ProtocolRequest =
            serde_json::from_value(json!({"id": "a", "action": "getTabs"})).unwrap();
        assert_eq!(req.payload, Value::Null);
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({"id": "a", "action": "getTabs"}));
    }
}
