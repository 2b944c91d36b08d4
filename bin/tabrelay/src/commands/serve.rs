use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path as AxumPath, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tabrelay_agent::{AgentSettings, BrowserAgent, ChatRequest, ChatService, ControllerBridge, SessionConfig, SessionManager};
use tabrelay_core::{Config, Error};
use tabrelay_providers::{create_provider, Provider};
use tabrelay_storage::RateLimiter;
use tabrelay_tools::builtin_schemas;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
struct GatewayState {
    chat: Arc<ChatService>,
    bridge: Arc<ControllerBridge>,
}

/// Error body shared by every route: `{error:{name,message,code,statusCode}}`.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn body(&self) -> Value {
        json!({
            "error": {
                "name": self.0.name(),
                "message": self.0.to_string(),
                "code": self.0.code(),
                "statusCode": self.0.status_code(),
            }
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        } else {
            debug!(error = %self.0, "Request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody {
    conversation_id: String,
    message: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

impl ChatBody {
    fn into_request(self) -> Result<ChatRequest, Error> {
        let conversation_id = Uuid::parse_str(&self.conversation_id)
            .map_err(|_| Error::Validation("conversationId: Invalid uuid".to_string()))?;
        if self.message.trim().is_empty() {
            return Err(Error::Validation("message: Message cannot be empty".to_string()));
        }
        Ok(ChatRequest {
            conversation_id: conversation_id.to_string(),
            message: self.message,
            provider: self.provider.filter(|p| !p.is_empty()),
            model: self.model.filter(|m| !m.is_empty()),
        })
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn handle_chat(
    State(state): State<GatewayState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.map_err(|e| Error::Validation(e.body_text()))?;
    let request = body.into_request()?;
    let conversation_id = request.conversation_id.clone();
    let response = state.chat.chat(request).await?;
    Ok(Json(json!({
        "conversationId": conversation_id,
        "response": response,
    })))
}

async fn handle_chat_delete(
    State(state): State<GatewayState>,
    AxumPath(conversation_id): AxumPath<String>,
) -> Result<Json<Value>, ApiError> {
    let sessions = state.chat.sessions();
    if !sessions.delete(&conversation_id) {
        return Err(Error::SessionNotFound(conversation_id).into());
    }
    Ok(Json(json!({
        "success": true,
        "message": format!("Session {} deleted", conversation_id),
        "sessionCount": sessions.count(),
    })))
}

async fn handle_stats(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({
        "sessions": state.chat.sessions().count(),
        "bridgeConnected": state.bridge.is_connected(),
        "pendingRequests": state.bridge.pending_count(),
    }))
}

async fn handle_controller_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_controller_socket(socket, state.bridge))
}

async fn handle_controller_socket(socket: WebSocket, bridge: Arc<ControllerBridge>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let client_id = bridge.register_client(tx);

    let send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_sender.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => bridge.handle_message(client_id, &text),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(client_id, error = %e, "Controller socket error");
                break;
            }
        }
    }

    bridge.unregister_client(client_id);
    send_task.abort();
}

fn build_router(state: GatewayState, controller_path: &str) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/chat", post(handle_chat))
        .route("/chat/:conversation_id", delete(handle_chat_delete))
        .route("/stats", get(handle_stats))
        .route(controller_path, get(handle_controller_upgrade))
        .layer(CorsLayer::permissive().allow_credentials(false))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds a fresh agent for each new conversation.
fn agent_factory(
    config: Arc<Config>,
    bridge: Arc<ControllerBridge>,
) -> impl Fn(&SessionConfig) -> tabrelay_core::Result<BrowserAgent> + Send + Sync + 'static {
    let tools: Vec<Value> = builtin_schemas().iter().map(|s| s.to_tool_json()).collect();
    move |session: &SessionConfig| {
        let defaults = &config.agents.defaults;
        let model = session.model.as_deref().unwrap_or(&defaults.model);
        let explicit = session.provider.as_deref().or(defaults.provider.as_deref());
        let provider: Arc<dyn Provider> = create_provider(&config, model, explicit)
            .map_err(|e| Error::Provider(e.to_string()))?
            .into();
        Ok(BrowserAgent::new(
            &session.conversation_id,
            provider,
            bridge.clone(),
            tools.clone(),
            AgentSettings::from(defaults),
        ))
    }
}

fn spawn_session_sweeper(
    sessions: Arc<SessionManager>,
    idle_ttl: Duration,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sessions.evict_idle(idle_ttl);
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}

pub async fn run(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let (_paths, config, db) = super::open_workspace()?;
    let config = Arc::new(config);
    let identity = super::resolve_identity(&config, &db)?;

    let bridge = Arc::new(ControllerBridge::new(Duration::from_millis(
        config.controller.request_timeout_ms,
    )));
    let sessions = Arc::new(SessionManager::new(agent_factory(config.clone(), bridge.clone())));
    let rate_limiter = config
        .rate_limit
        .enabled
        .then(|| RateLimiter::new(db.clone(), config.rate_limit.daily_limit));
    let chat = Arc::new(ChatService::new(sessions.clone(), rate_limiter, identity.clone()));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let sweeper = (config.sessions.idle_ttl_secs > 0).then(|| {
        spawn_session_sweeper(
            sessions.clone(),
            Duration::from_secs(config.sessions.idle_ttl_secs),
            Duration::from_secs(config.sessions.sweep_interval_secs.max(1)),
            shutdown_tx.subscribe(),
        )
    });

    let state = GatewayState {
        chat,
        bridge: bridge.clone(),
    };
    let app = build_router(state, &config.gateway.controller_path);

    let host = host.unwrap_or_else(|| config.gateway.host.clone());
    let port = port.unwrap_or(config.gateway.port);
    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!(
        addr = %bind_addr,
        controller_path = %config.gateway.controller_path,
        identity = %identity,
        rate_limit = config.rate_limit.enabled,
        "Gateway listening"
    );

    let mut http_shutdown_rx = shutdown_tx.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown_rx.recv().await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());

    if let Err(e) = server.await? {
        warn!(error = %e, "HTTP server exited with error");
    }
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }
    info!(pending = bridge.pending_count(), "Gateway stopped");
    Ok(())
}
