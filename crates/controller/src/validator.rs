//! Envelope validation and in-flight request ID tracking.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tabrelay_core::{Error, ProtocolRequest, Result};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_ID_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct RequestValidator {
    active: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RequestValidator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            ttl,
            sweeper: Mutex::new(None),
        }
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Parses `raw` into a request and marks its ID active.
    ///
    /// Fails with [`Error::Validation`] on a malformed envelope and with
    /// [`Error::DuplicateRequest`] when the ID is still outstanding.
    pub fn validate(&self, raw: &Value) -> Result<ProtocolRequest> {
        let request = parse_envelope(raw)?;
        let mut active = self.active();
        if active.contains_key(&request.id) {
            return Err(Error::DuplicateRequest(request.id));
        }
        active.insert(request.id.clone(), Instant::now());
        Ok(request)
    }

    /// Releases an ID. Call once per successfully validated request.
    pub fn mark_complete(&self, id: &str) {
        if self.active().remove(id).is_none() {
            debug!(id, "mark_complete for an ID that was not active");
        }
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active().contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.active().len()
    }

    /// Drops IDs older than the configured TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let ttl = self.ttl;
        let mut active = self.active();
        let before = active.len();
        active.retain(|_, inserted| inserted.elapsed() < ttl);
        let removed = before - active.len();
        if removed > 0 {
            warn!(removed, "Swept stale request IDs that were never completed");
        }
        removed
    }

    /// Starts the periodic sweep. The task holds only a weak reference and
    /// exits once the validator is dropped.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(validator) => {
                        validator.sweep();
                    }
                    None => break,
                }
            }
        });
        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stops the sweeper and forgets every active ID.
    pub fn destroy(&self) {
        if let Some(handle) = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        self.active().clear();
    }
}

impl Default for RequestValidator {
    fn default() -> Self {
        Self::new(DEFAULT_ID_TTL)
    }
}

impl Drop for RequestValidator {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().ok().and_then(Option::take) {
            handle.abort();
        }
    }
}

fn parse_envelope(raw: &Value) -> Result<ProtocolRequest> {
    let obj = raw
        .as_object()
        .ok_or_else(|| Error::Validation("expected a JSON object".to_string()))?;

    let id = required_string(obj.get("id"), "id")?;
    let action = required_string(obj.get("action"), "action")?;
    let payload = obj.get("payload").cloned().unwrap_or(Value::Null);

    Ok(ProtocolRequest::new(id, action, payload))
}

fn required_string<'a>(value: Option<&'a Value>, field: &str) -> Result<&'a str> {
    match value {
        None | Some(Value::Null) => Err(Error::Validation(format!("{}: Required", field))),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(Error::Validation(format!("{}: must not be empty", field)))
        }
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(Error::Validation(format!(
            "{}: expected string, received {}",
            field,
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_envelope() {
        let validator = RequestValidator::default();
        let req = validator
            .validate(&json!({"id": "r1", "action": "getTabs", "payload": {"x": 1}}))
            .unwrap();
        assert_eq!(req.id, "r1");
        assert_eq!(req.action, "getTabs");
        assert_eq!(req.payload, json!({"x": 1}));
        assert!(validator.is_active("r1"));
    }

    #[test]
    fn test_missing_payload_is_null() {
        let validator = RequestValidator::default();
        let req = validator.validate(&json!({"id": "r1", "action": "getTabs"})).unwrap();
        assert!(req.payload.is_null());
    }

    #[test]
    fn test_malformed_envelopes() {
        let validator = RequestValidator::default();
        for raw in [
            json!("text"),
            json!({"action": "getTabs"}),
            json!({"id": 7, "action": "getTabs"}),
            json!({"id": "r1"}),
            json!({"id": "r1", "action": ""}),
        ] {
            let err = validator.validate(&raw).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{}", raw);
        }
        // Nothing got tracked.
        assert_eq!(validator.active_count(), 0);
    }

    #[test]
    fn test_duplicate_until_complete() {
        let validator = RequestValidator::default();
        let raw = json!({"id": "dup", "action": "getTabs"});
        validator.validate(&raw).unwrap();

        let err = validator.validate(&raw).unwrap_err();
        assert!(matches!(err, Error::DuplicateRequest(ref id) if id == "dup"));

        validator.mark_complete("dup");
        assert!(validator.validate(&raw).is_ok());
    }

    #[test]
    fn test_sweep_removes_stale_ids() {
        let validator = RequestValidator::new(Duration::from_millis(10));
        validator.validate(&json!({"id": "old", "action": "a"})).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        validator.validate(&json!({"id": "new", "action": "a"})).unwrap();

        assert_eq!(validator.sweep(), 1);
        assert!(!validator.is_active("old"));
        assert!(validator.is_active("new"));
    }

    #[tokio::test]
    async fn test_background_sweeper() {
        let validator = Arc::new(RequestValidator::new(Duration::from_millis(5)));
        validator.validate(&json!({"id": "leak", "action": "a"})).unwrap();
        validator.start_sweeper(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(validator.active_count(), 0);

        validator.destroy();
    }
}
