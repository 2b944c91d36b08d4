//! The browser-side request pipeline.
//!
//! Every inbound request goes through validate, track, admit, dispatch and
//! respond. Admission into the [`ConcurrencyLimiter`] happens synchronously
//! in [`BrowserController::handle_message`], so requests run in the order
//! their frames arrived.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tabrelay_core::config::ControllerConfig;
use tabrelay_core::{ActionResponse, Error, ProtocolRequest, ProtocolResponse, Result};
use tabrelay_scheduler::ConcurrencyLimiter;
use tabrelay_tools::ActionRegistry;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::response_queue::ResponseQueue;
use crate::tracker::RequestTracker;
use crate::validator::RequestValidator;

/// Outbound half of the connection to the agent server.
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;
    fn send(&self, text: String) -> Result<()>;
}

pub struct BrowserController {
    validator: Arc<RequestValidator>,
    tracker: RequestTracker,
    limiter: ConcurrencyLimiter,
    registry: Arc<ActionRegistry>,
    responses: ResponseQueue,
    transport: Arc<dyn Transport>,
    config: ControllerConfig,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl BrowserController {
    pub fn new(
        config: ControllerConfig,
        registry: Arc<ActionRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        info!(
            actions = registry.action_count(),
            max_queue_size = config.max_queue_size,
            "BrowserController created"
        );
        Self {
            validator: Arc::new(RequestValidator::new(Duration::from_secs(
                config.validator_ttl_secs,
            ))),
            tracker: RequestTracker::new(),
            limiter: ConcurrencyLimiter::new(config.max_concurrent, config.max_queue_size),
            registry,
            responses: ResponseQueue::new(config.response_queue_size),
            transport,
            config,
            maintenance: Mutex::new(None),
        }
    }

    /// Starts the validator sweep and the periodic tracker maintenance.
    pub fn start(self: &Arc<Self>) {
        let interval = Duration::from_secs(self.config.validator_sweep_secs.max(1));
        self.validator.start_sweeper(interval);

        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                controller.maintain();
            }
        });
        let previous = self
            .maintenance
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.maintenance.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        self.validator.destroy();
        self.responses.clear();
        info!("BrowserController stopped");
    }

    fn maintain(&self) {
        self.tracker
            .cleanup(Duration::from_secs(self.config.tracker_retention_secs));
        let hung = self
            .tracker
            .hung_requests(Duration::from_millis(self.config.hung_threshold_ms));
        if !hung.is_empty() {
            warn!(count = hung.len(), "Hung requests detected");
        }
        self.limiter.log_stats();
    }

    /// Entry point for one inbound text frame.
    pub fn handle_message(self: &Arc<Self>, text: &str) -> Option<JoinHandle<()>> {
        let raw: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Dropping non-JSON message");
                return None;
            }
        };

        if raw.get("action").is_some() {
            self.accept_request(raw)
        } else if raw.get("ok").is_some() {
            debug!(message = %raw, "Server message");
            None
        } else {
            warn!(message = %raw, "Unrecognized message");
            None
        }
    }

    /// Validates and admits a request. The returned handle settles once the
    /// request has been answered and released.
    pub fn accept_request(self: &Arc<Self>, raw: Value) -> Option<JoinHandle<()>> {
        let request = match self.validator.validate(&raw) {
            Ok(request) => request,
            Err(Error::DuplicateRequest(id)) => {
                warn!(id = %id, "Duplicate request ignored");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Invalid request");
                if let Some(id) = raw.get("id").and_then(Value::as_str) {
                    if !self.validator.is_active(id) {
                        self.send_response(ProtocolResponse::failure(id, e.to_string()));
                    }
                }
                return None;
            }
        };

        let ProtocolRequest {
            id,
            action,
            payload,
        } = request;
        self.tracker.start(&id, &action);

        let this = self.clone();
        let task_id = id.clone();
        let task = async move {
            this.tracker.mark_executing(&task_id);
            let outcome = this.run_action(&action, payload).await;
            this.send_response(ProtocolResponse::new(task_id, outcome.clone()));
            Ok(outcome)
        };

        let handle = match self.limiter.submit(task) {
            Ok(handle) => handle,
            Err(e) => {
                self.fail(&id, &e);
                return None;
            }
        };

        let this = self.clone();
        Some(tokio::spawn(async move {
            match handle.await {
                Ok(outcome) => this.finish(&id, outcome.error().map(str::to_string)),
                Err(e) => this.fail(&id, &e),
            }
        }))
    }

    async fn run_action(&self, action: &str, payload: Value) -> ActionResponse {
        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        match tokio::time::timeout(timeout, self.registry.dispatch(action, payload)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(action, timeout_ms = self.config.request_timeout_ms, "Action timed out");
                ActionResponse::failure(
                    Error::Timeout(format!(
                        "Action {} timed out after {} ms",
                        action, self.config.request_timeout_ms
                    ))
                    .to_string(),
                )
            }
        }
    }

    fn finish(&self, id: &str, error: Option<String>) {
        self.tracker.complete(id, error);
        self.validator.mark_complete(id);
    }

    fn fail(&self, id: &str, err: &Error) {
        warn!(id, error = %err, "Request failed before producing a response");
        self.finish(id, Some(err.to_string()));
        self.send_response(ProtocolResponse::failure(id, err.to_string()));
    }

    /// Sends now if connected, otherwise queues for the next connection.
    pub fn send_response(&self, response: ProtocolResponse) {
        if !self.transport.is_connected() {
            self.responses.enqueue(response);
            return;
        }
        let text = match serde_json::to_string(&response) {
            Ok(text) => text,
            Err(e) => {
                error!(id = %response.id, error = %e, "Failed to serialize response");
                return;
            }
        };
        if let Err(e) = self.transport.send(text) {
            warn!(id = %response.id, error = %e, "Send failed, queueing response");
            self.responses.enqueue(response);
        }
    }

    /// Flushes responses queued while disconnected.
    pub fn on_connected(&self) -> usize {
        let transport = self.transport.clone();
        self.responses.flush(|response| {
            let text = serde_json::to_string(response)?;
            transport.send(text)
        })
    }

    pub fn queued_responses(&self) -> usize {
        self.responses.len()
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    pub fn stats(&self) -> Value {
        json!({
            "limiter": self.limiter.stats(),
            "requests": self.tracker.stats(),
            "activeIds": self.validator.active_count(),
            "queuedResponses": self.responses.len(),
            "actions": self.registry.action_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tabrelay_tools::{ActionHandler, ActionSchema};

    #[derive(Default)]
    struct RecordingTransport {
        connected: AtomicBool,
        sent: Mutex<Vec<Value>>,
    }

    impl RecordingTransport {
        fn connected() -> Arc<Self> {
            let t = Self::default();
            t.connected.store(true, Ordering::SeqCst);
            Arc::new(t)
        }

        fn sent(&self) -> Vec<Value> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for RecordingTransport {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn send(&self, text: String) -> Result<()> {
            if !self.is_connected() {
                return Err(Error::NotConnected("closed".to_string()));
            }
            self.sent.lock().unwrap().push(serde_json::from_str(&text)?);
            Ok(())
        }
    }

    struct Echo;

    #[async_trait]
    impl ActionHandler for Echo {
        fn schema(&self) -> ActionSchema {
            ActionSchema {
                name: "echo",
                description: "Returns its payload",
                parameters: json!({"type": "object"}),
            }
        }

        fn validate(&self, _payload: &Value) -> Result<()> {
            Ok(())
        }

        async fn execute(&self, payload: Value) -> Result<Value> {
            if payload.get("fail").is_some() {
                return Err(Error::Other("asked to fail".to_string()));
            }
            if let Some(ms) = payload.get("sleepMs").and_then(Value::as_u64) {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            Ok(payload)
        }
    }

    fn controller(transport: Arc<RecordingTransport>, config: ControllerConfig) -> Arc<BrowserController> {
        let registry = Arc::new(ActionRegistry::new());
        registry.register(Arc::new(Echo));
        Arc::new(BrowserController::new(config, registry, transport))
    }

    #[tokio::test]
    async fn test_request_roundtrip() {
        let transport = RecordingTransport::connected();
        let ctrl = controller(transport.clone(), ControllerConfig::default());

        let handle = ctrl
            .handle_message(r#"{"id":"r1","action":"echo","payload":{"v":1}}"#)
            .unwrap();
        handle.await.unwrap();

        assert_eq!(transport.sent(), vec![json!({"id": "r1", "ok": true, "data": {"v": 1}})]);
        assert_eq!(ctrl.stats()["activeIds"], 0);
        assert_eq!(
            ctrl.tracker().get("r1").unwrap().status,
            crate::tracker::RequestStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_handler_failure_is_structured() {
        let transport = RecordingTransport::connected();
        let ctrl = controller(transport.clone(), ControllerConfig::default());

        ctrl.handle_message(r#"{"id":"r1","action":"echo","payload":{"fail":true}}"#)
            .unwrap()
            .await
            .unwrap();
        ctrl.handle_message(r#"{"id":"r2","action":"nope"}"#)
            .unwrap()
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent[0]["ok"], false);
        assert_eq!(sent[0]["error"], "Action execution failed: asked to fail");
        assert!(sent[1]["error"]
            .as_str()
            .unwrap()
            .starts_with("Unknown action: \"nope\". Available actions: echo"));
        assert_eq!(
            ctrl.tracker().get("r1").unwrap().status,
            crate::tracker::RequestStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_duplicate_gets_no_response() {
        let transport = RecordingTransport::connected();
        let ctrl = controller(transport.clone(), ControllerConfig::default());

        let first = ctrl
            .handle_message(r#"{"id":"same","action":"echo","payload":{"sleepMs":30}}"#)
            .unwrap();
        assert!(ctrl
            .handle_message(r#"{"id":"same","action":"echo"}"#)
            .is_none());
        first.await.unwrap();

        assert_eq!(transport.sent().len(), 1);
        // Released, so the ID is usable again.
        ctrl.handle_message(r#"{"id":"same","action":"echo"}"#)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_with_id_gets_failure() {
        let transport = RecordingTransport::connected();
        let ctrl = controller(transport.clone(), ControllerConfig::default());

        assert!(ctrl.handle_message(r#"{"id":"bad","action":7}"#).is_none());
        assert!(ctrl.handle_message("not json").is_none());
        assert!(ctrl.handle_message(r#"{"ok":true}"#).is_none());

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["id"], "bad");
        assert_eq!(sent[0]["ok"], false);
    }

    #[tokio::test]
    async fn test_overload_answers_immediately() {
        let transport = RecordingTransport::connected();
        let config = ControllerConfig {
            max_queue_size: 1,
            ..Default::default()
        };
        let ctrl = controller(transport.clone(), config);

        let running = ctrl
            .handle_message(r#"{"id":"a","action":"echo","payload":{"sleepMs":30}}"#)
            .unwrap();
        let queued = ctrl.handle_message(r#"{"id":"b","action":"echo"}"#).unwrap();
        assert!(ctrl.handle_message(r#"{"id":"c","action":"echo"}"#).is_none());

        let rejected = transport.sent();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0]["id"], "c");
        assert!(rejected[0]["error"]
            .as_str()
            .unwrap()
            .starts_with("Controller overloaded."));

        running.await.unwrap();
        queued.await.unwrap();
        let ids: Vec<Value> = transport.sent().iter().map(|m| m["id"].clone()).collect();
        assert_eq!(ids, vec![json!("c"), json!("a"), json!("b")]);
    }

    #[tokio::test]
    async fn test_action_timeout() {
        let transport = RecordingTransport::connected();
        let config = ControllerConfig {
            request_timeout_ms: 10,
            ..Default::default()
        };
        let ctrl = controller(transport.clone(), config);

        ctrl.handle_message(r#"{"id":"slow","action":"echo","payload":{"sleepMs":500}}"#)
            .unwrap()
            .await
            .unwrap();
        let sent = transport.sent();
        assert_eq!(sent[0]["ok"], false);
        assert!(sent[0]["error"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_queues_while_disconnected() {
        let transport = Arc::new(RecordingTransport::default());
        let ctrl = controller(transport.clone(), ControllerConfig::default());

        ctrl.handle_message(r#"{"id":"r1","action":"echo"}"#)
            .unwrap()
            .await
            .unwrap();
        assert!(transport.sent().is_empty());
        assert_eq!(ctrl.queued_responses(), 1);

        transport.connected.store(true, Ordering::SeqCst);
        assert_eq!(ctrl.on_connected(), 1);
        assert_eq!(transport.sent()[0]["id"], "r1");
        assert_eq!(ctrl.queued_responses(), 0);
    }
}
