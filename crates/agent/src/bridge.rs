//! Server side of the controller socket.
//!
//! Each connected controller gets a client id and an outbound channel. The
//! newest connection is primary; requests go to the primary and responses
//! are matched back to their caller by request id. Tool calls from all
//! conversations share one FIFO lock, so only one is on the wire at a time.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tabrelay_core::{Error, ProtocolRequest, ProtocolResponse, Result};
use tabrelay_scheduler::Mutex as ToolMutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::ActionExecutor;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const HANDLER_PREFIX: &str = "Action execution failed: ";

#[derive(Default)]
struct BridgeState {
    next_client_id: u64,
    clients: HashMap<u64, mpsc::UnboundedSender<String>>,
    primary: Option<u64>,
    pending: HashMap<String, oneshot::Sender<Result<Value>>>,
}

pub struct ControllerBridge {
    state: Mutex<BridgeState>,
    tool_mutex: ToolMutex,
    default_timeout: Duration,
}

impl ControllerBridge {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(BridgeState::default()),
            tool_mutex: ToolMutex::new(),
            default_timeout,
        }
    }

    fn state(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a controller connection and makes it primary.
    pub fn register_client(&self, tx: mpsc::UnboundedSender<String>) -> u64 {
        let mut state = self.state();
        state.next_client_id += 1;
        let client_id = state.next_client_id;
        state.clients.insert(client_id, tx);
        state.primary = Some(client_id);
        info!(client_id, clients = state.clients.len(), "Controller connected");
        client_id
    }

    /// Removes a connection. When it was primary, every pending request
    /// fails and the most recent remaining client takes over.
    pub fn unregister_client(&self, client_id: u64) {
        let mut state = self.state();
        if state.clients.remove(&client_id).is_none() {
            return;
        }
        info!(client_id, clients = state.clients.len(), "Controller disconnected");
        if state.primary != Some(client_id) {
            return;
        }
        state.primary = state.clients.keys().max().copied();
        let pending: Vec<_> = state.pending.drain().collect();
        drop(state);

        if !pending.is_empty() {
            warn!(count = pending.len(), "Failing pending requests after primary disconnect");
        }
        for (id, tx) in pending {
            let _ = tx.send(Err(Error::NotConnected(format!(
                "Controller disconnected before answering request {}",
                id
            ))));
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().primary.is_some()
    }

    pub fn client_count(&self) -> usize {
        self.state().clients.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// Tool calls waiting for their turn behind the one in flight.
    pub fn queued_tool_calls(&self) -> usize {
        self.tool_mutex.waiting()
    }

    /// Sends an action to the primary controller and waits for its response.
    pub async fn send_request(
        &self,
        action: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let id = Uuid::new_v4().to_string();
        let text = serde_json::to_string(&ProtocolRequest::new(id.as_str(), action, payload))?;

        let rx = {
            let mut state = self.state();
            let tx = state
                .primary
                .and_then(|client_id| state.clients.get(&client_id))
                .cloned()
                .ok_or_else(|| Error::NotConnected("no controller connected".to_string()))?;
            let (done_tx, done_rx) = oneshot::channel();
            state.pending.insert(id.clone(), done_tx);
            if tx.send(text).is_err() {
                state.pending.remove(&id);
                return Err(Error::NotConnected("controller connection closed".to_string()));
            }
            done_rx
        };
        debug!(id = %id, action, "Request sent to controller");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NotConnected(format!(
                "Request {} was dropped",
                id
            ))),
            Err(_) => {
                self.state().pending.remove(&id);
                warn!(id = %id, action, timeout_ms = timeout.as_millis() as u64, "Request timed out");
                Err(Error::Timeout(format!(
                    "Request {} timed out after {} ms",
                    id,
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Handles one text frame from `client_id`.
    pub fn handle_message(&self, client_id: u64, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(client_id, error = %e, "Invalid JSON from controller");
                return;
            }
        };

        if value.get("type").and_then(Value::as_str) == Some("ping") {
            let tx = self.state().clients.get(&client_id).cloned();
            if let Some(tx) = tx {
                let _ = tx.send(r#"{"type":"pong"}"#.to_string());
            }
            return;
        }

        let response: ProtocolResponse = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                warn!(client_id, error = %e, "Unrecognized controller message");
                return;
            }
        };

        let Some(tx) = self.state().pending.remove(&response.id) else {
            warn!(id = %response.id, "Response for unknown request");
            return;
        };
        let result = response.outcome.into_result().map_err(|error| {
            let detail = error.strip_prefix(HANDLER_PREFIX).unwrap_or(&error);
            Error::HandlerExecution(detail.to_string())
        });
        let _ = tx.send(result);
    }
}

impl Default for ControllerBridge {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

#[async_trait]
impl ActionExecutor for ControllerBridge {
    async fn execute_action(&self, action: &str, payload: Value) -> Result<Value> {
        let _guard = self.tool_mutex.acquire().await;
        self.send_request(action, payload, None).await
    }
}
