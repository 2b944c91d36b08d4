use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tabrelay_core::config::ConnectionConfig;
use tabrelay_core::{Error, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::controller::{BrowserController, Transport};

/// Connection state as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// WebSocket link from the browser side to the agent server.
pub struct ControllerClient {
    config: ConnectionConfig,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    state: Mutex<ConnectionState>,
}

impl ControllerClient {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            outbound: Mutex::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
        }
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.outbound.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != next {
            info!(from = %*state, to = %next, "Connection state changed");
            *state = next;
        }
    }

    /// Connects, serves, and reconnects until `shutdown` fires.
    pub async fn run_loop(
        self: Arc<Self>,
        controller: Arc<BrowserController>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let delay = Duration::from_millis(self.config.reconnect_delay_ms);
        loop {
            tokio::select! {
                result = self.connect_and_run(&controller) => {
                    match result {
                        Ok(()) => info!("Controller connection closed"),
                        Err(e) => error!(error = %e, "Controller connection error"),
                    }
                }
                _ = shutdown.recv() => break,
            }

            self.set_state(ConnectionState::Reconnecting);
            info!(delay_ms = self.config.reconnect_delay_ms, "Reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => break,
            }
        }
        self.outbound().take();
        self.set_state(ConnectionState::Disconnected);
        info!("Controller client shutting down");
    }

    async fn connect_and_run(&self, controller: &Arc<BrowserController>) -> Result<()> {
        let ws_url = self.config.ws_url();
        let url = url::Url::parse(&ws_url)
            .map_err(|e| Error::Config(format!("Invalid server URL {}: {}", ws_url, e)))?;

        self.set_state(ConnectionState::Connecting);
        info!(url = %ws_url, "Connecting to agent server");

        let connect_timeout = Duration::from_millis(self.config.connection_timeout_ms);
        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "Connection to {} timed out after {} ms",
                    ws_url, self.config.connection_timeout_ms
                ))
            })?
            .map_err(|e| Error::Transport(format!("WebSocket connection failed: {}", e)))?;

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *self.outbound() = Some(tx);
        self.set_state(ConnectionState::Connected);

        let flushed = controller.on_connected();
        if flushed > 0 {
            info!(flushed, "Delivered responses queued while offline");
        }

        let result = self.serve(&mut write, &mut read, &mut rx, controller).await;

        self.outbound().take();
        self.set_state(ConnectionState::Disconnected);
        let _ = write.close().await;
        result
    }

    async fn serve<W, R>(
        &self,
        write: &mut W,
        read: &mut R,
        rx: &mut mpsc::UnboundedReceiver<String>,
        controller: &Arc<BrowserController>,
    ) -> Result<()>
    where
        W: futures::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
        R: futures::Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        let heartbeat_timeout = Duration::from_millis(self.config.heartbeat_timeout_ms);
        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms.max(1)));
        heartbeat.tick().await;

        let pong_deadline = tokio::time::sleep(heartbeat_timeout);
        tokio::pin!(pong_deadline);
        let mut awaiting_pong = false;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            awaiting_pong = false;
                            if is_pong(&text) {
                                debug!("Heartbeat pong received");
                                continue;
                            }
                            controller.handle_message(&text);
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            awaiting_pong = false;
                            write
                                .send(WsMessage::Pong(data))
                                .await
                                .map_err(|e| Error::Transport(e.to_string()))?;
                        }
                        Some(Ok(WsMessage::Close(_))) => {
                            info!("Server closed the connection");
                            return Ok(());
                        }
                        Some(Ok(_)) => {
                            awaiting_pong = false;
                        }
                        Some(Err(e)) => {
                            return Err(Error::Transport(format!("WebSocket error: {}", e)));
                        }
                        None => {
                            info!("WebSocket stream ended");
                            return Ok(());
                        }
                    }
                }
                Some(text) = rx.recv() => {
                    write
                        .send(WsMessage::Text(text))
                        .await
                        .map_err(|e| Error::Transport(format!("Failed to send: {}", e)))?;
                }
                _ = heartbeat.tick() => {
                    if !awaiting_pong {
                        write
                            .send(WsMessage::Text(r#"{"type":"ping"}"#.to_string()))
                            .await
                            .map_err(|e| Error::Transport(format!("Failed to send heartbeat: {}", e)))?;
                        pong_deadline.as_mut().reset(Instant::now() + heartbeat_timeout);
                        awaiting_pong = true;
                    }
                }
                _ = &mut pong_deadline, if awaiting_pong => {
                    warn!(timeout_ms = self.config.heartbeat_timeout_ms, "Heartbeat timed out");
                    return Err(Error::Timeout("Heartbeat timed out".to_string()));
                }
            }
        }
    }
}

impl Transport for ControllerClient {
    fn is_connected(&self) -> bool {
        self.outbound()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    fn send(&self, text: String) -> Result<()> {
        match self.outbound().as_ref() {
            Some(tx) => tx
                .send(text)
                .map_err(|_| Error::NotConnected("connection closed".to_string())),
            None => Err(Error::NotConnected("no active connection".to_string())),
        }
    }
}

fn is_pong(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(Value::as_str).map(|t| t == "pong"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_by_default() {
        let client = ControllerClient::new(ConnectionConfig::default());
        assert!(!client.is_connected());
        assert!(matches!(
            client.send("x".to_string()),
            Err(Error::NotConnected(_))
        ));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_send_goes_through_outbound_channel() {
        let client = ControllerClient::new(ConnectionConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        *client.outbound() = Some(tx);

        assert!(client.is_connected());
        client.send("hello".to_string()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "hello");

        drop(rx);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_is_pong() {
        assert!(is_pong(r#"{"type":"pong"}"#));
        assert!(!is_pong(r#"{"type":"ping"}"#));
        assert!(!is_pong("garbage"));
    }
}
