//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! One browser-level connection is shared by every tab; page commands are
//! routed with a flat-mode `sessionId` obtained from `Target.attachToTarget`.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tabrelay_core::{Error, Result};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// A CDP WebSocket client that can send commands and receive responses.
pub struct CdpClient {
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request ID.
    pending: Pending,
    next_id: AtomicU64,
    command_timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Resolve the browser WebSocket URL from an HTTP debugging endpoint
    /// such as `http://127.0.0.1:9222`. `ws://` URLs are returned unchanged.
    pub async fn discover_ws_url(endpoint: &str) -> Result<String> {
        if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
            return Ok(endpoint.to_string());
        }
        let url = format!("{}/json/version", endpoint.trim_end_matches('/'));
        let body: Value = reqwest::get(&url)
            .await
            .map_err(|e| Error::Transport(format!("CDP endpoint {} unreachable: {}", url, e)))?
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Invalid /json/version response: {}", e)))?;
        body.get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Transport("No webSocketDebuggerUrl in /json/version".to_string()))
    }

    /// Connect to a Chrome CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::Transport(format!("Failed to connect to CDP endpoint {}: {}", ws_url, e)))?;

        let (mut ws_sink, mut ws_read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let pending_reader = pending.clone();

        // Writer task: owns the sink, forwards messages from channel
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: routes command responses; events are ignored
        let reader_handle = tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            if let Some(tx) = pending_reader.lock().await.remove(&id) {
                                let _ = tx.send(val);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by browser");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            // Fail everything still waiting.
            pending_reader.lock().await.clear();
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            command_timeout,
            reader_handle,
            writer_handle,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.reader_handle.is_finished() || self.ws_tx.is_closed()
    }

    /// Send a browser-level CDP command and wait for the response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        self.send(None, method, params).await
    }

    /// Send a command to an attached target session.
    pub async fn send_to_session(&self, session_id: &str, method: &str, params: Value) -> Result<Value> {
        self.send(Some(session_id), method, params).await
    }

    async fn send(&self, session_id: Option<&str>, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(sid) = session_id {
            msg["sessionId"] = json!(sid);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.ws_tx.send(msg.to_string()).await {
            self.pending.lock().await.remove(&id);
            return Err(Error::Transport(format!("Failed to send CDP command: {}", e)));
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(Error::Transport(format!("CDP error in {}: {}", method, error)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Transport("CDP connection closed".to_string())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout(format!(
                    "CDP command '{}' timed out after {}ms",
                    method,
                    self.command_timeout.as_millis()
                )))
            }
        }
    }

    // ─── Tab / Target management ──────────────────────────────────────

    /// All browser targets (pages, iframes, workers, ...).
    pub async fn get_targets(&self) -> Result<Vec<Value>> {
        let result = self.send_command("Target.getTargets", json!({})).await?;
        Ok(result
            .get("targetInfos")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// Create a new page target (tab) with the given URL.
    pub async fn create_target(&self, url: &str) -> Result<String> {
        let result = self
            .send_command("Target.createTarget", json!({"url": url}))
            .await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Transport("No targetId returned from createTarget".to_string()))
    }

    pub async fn close_target(&self, target_id: &str) -> Result<()> {
        self.send_command("Target.closeTarget", json!({"targetId": target_id}))
            .await?;
        Ok(())
    }

    pub async fn activate_target(&self, target_id: &str) -> Result<()> {
        self.send_command("Target.activateTarget", json!({"targetId": target_id}))
            .await?;
        Ok(())
    }

    /// Attach in flat mode and return the session id for page commands.
    pub async fn attach_to_target(&self, target_id: &str) -> Result<String> {
        let result = self
            .send_command(
                "Target.attachToTarget",
                json!({"targetId": target_id, "flatten": true}),
            )
            .await?;
        result
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Transport(format!("No sessionId for target {}", target_id)))
    }

    // ─── Page-level helpers ───────────────────────────────────────────

    pub async fn navigate(&self, session_id: &str, url: &str) -> Result<()> {
        let result = self
            .send_to_session(session_id, "Page.navigate", json!({"url": url}))
            .await?;
        if let Some(err) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(Error::Transport(format!("Navigation to {} failed: {}", url, err)));
        }
        Ok(())
    }

    /// Evaluate JavaScript in the page and return the by-value result.
    pub async fn evaluate_js(&self, session_id: &str, expression: &str) -> Result<Value> {
        let result = self
            .send_to_session(
                session_id,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(|v| v.as_str())
                .unwrap_or("script threw an exception");
            return Err(Error::Other(text.to_string()));
        }
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    /// Take a screenshot and return base64-encoded PNG data.
    pub async fn screenshot(&self, session_id: &str) -> Result<String> {
        let result = self
            .send_to_session(session_id, "Page.captureScreenshot", json!({"format": "png"}))
            .await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Transport("No screenshot data returned".to_string()))
    }

    /// Press and release the left button at viewport coordinates.
    pub async fn click_at(&self, session_id: &str, x: f64, y: f64) -> Result<()> {
        for event_type in ["mousePressed", "mouseReleased"] {
            self.send_to_session(
                session_id,
                "Input.dispatchMouseEvent",
                json!({
                    "type": event_type,
                    "x": x,
                    "y": y,
                    "button": "left",
                    "clickCount": 1,
                }),
            )
            .await?;
        }
        Ok(())
    }

    /// Insert text into the focused element (bypasses key events).
    pub async fn insert_text(&self, session_id: &str, text: &str) -> Result<()> {
        self.send_to_session(session_id, "Input.insertText", json!({"text": text}))
            .await?;
        Ok(())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}
