//! HTTP transport
//!
//! JSON-RPC requests arrive as POST bodies and are answered inline.
//! Client-bound notifications and requests are fanned out as server-sent
//! events on `/notifications`; tap frames on `/events`. Control routes expose
//! the kill switch and approval answers to operators.

use super::engine::BridgeEngine;
use crate::error::{Error, Result};
use crate::hub::HubCommand;
use crate::rpc::JsonRpcMessage;
use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Buffered client-bound messages per SSE subscriber
const NOTIFICATION_CAPACITY: usize = 1024;

/// Shared state of the HTTP routes
#[derive(Clone)]
pub struct HttpState {
    engine: Arc<BridgeEngine>,
    notifications: broadcast::Sender<JsonRpcMessage>,
}

impl HttpState {
    pub fn new(engine: Arc<BridgeEngine>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            engine,
            notifications,
        }
    }

    /// Fan client-bound messages out to every `/notifications` subscriber
    pub fn forward_from(&self, mut client_rx: mpsc::UnboundedReceiver<JsonRpcMessage>) {
        let tx = self.notifications.clone();
        tokio::spawn(async move {
            while let Some(message) = client_rx.recv().await {
                // No subscriber is not an error
                let _ = tx.send(message);
            }
        });
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    dialect: &'static str,
    sessions: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApprovalBody {
    approved: bool,
    #[serde(default)]
    option_id: Option<String>,
}

/// Build the bridge router
pub fn router(state: HttpState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/", post(rpc_handler))
        .route("/rpc", post(rpc_handler))
        .route("/health", get(health))
        .route("/events", get(tap_events))
        .route("/notifications", get(notifications))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id/frames", get(session_frames))
        .route(
            "/control/sessions/:id/kill",
            post(kill_session).delete(clear_kill),
        )
        .route(
            "/control/sessions/:id/approvals/:tool_call_id",
            post(answer_approval),
        )
        .route("/control/commands", post(apply_command))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors(cors_origins))
        .with_state(state)
}

/// Serve until ctrl-c, then shut the engine down
pub async fn serve_http(
    engine: Arc<BridgeEngine>,
    client_rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
    addr: SocketAddr,
    cors_origins: &[String],
) -> Result<()> {
    let state = HttpState::new(engine.clone());
    state.forward_from(client_rx);
    let app = router(state, cors_origins);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Transport(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!(addr = %addr, "HTTP transport listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .map_err(|e| Error::Transport(format!("HTTP server failed: {}", e)))?;

    engine.shutdown().await;
    Ok(())
}

async fn rpc_handler(State(state): State<HttpState>, body: String) -> Response {
    match state.engine.handle_line(&body).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn health(State(state): State<HttpState>) -> impl IntoResponse {
    let dialect = state
        .engine
        .routes()
        .primary()
        .map(|a| a.name())
        .unwrap_or("none");
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        dialect,
        sessions: state.engine.context().sessions.active_ids().await.len(),
    })
}

async fn tap_events(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let rx = state.engine.context().recorder.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| {
        // Lagged subscribers skip what they missed
        let frame = item.ok()?;
        let event = Event::default()
            .event(frame.frame_type.clone())
            .json_data(&frame)
            .ok()?;
        Some(Ok(event))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn notifications(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.notifications.subscribe()).filter_map(|item| {
        let event = Event::default().json_data(item.ok()?).ok()?;
        Some(Ok(event))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn list_sessions(State(state): State<HttpState>) -> impl IntoResponse {
    Json(state.engine.context().sessions.list().await)
}

async fn session_frames(State(state): State<HttpState>, Path(id): Path<String>) -> Response {
    let ctx = state.engine.context();
    if ctx.sessions.get(&id).await.is_none() {
        return not_found(format!("Session {} not found", id));
    }
    Json(ctx.recorder.frames(&id).await).into_response()
}

async fn kill_session(State(state): State<HttpState>, Path(id): Path<String>) -> impl IntoResponse {
    let killed = state
        .engine
        .apply_hub_command(HubCommand::Kill {
            session_id: id.clone(),
        })
        .await;
    Json(json!({"sessionId": id, "killed": killed}))
}

async fn clear_kill(State(state): State<HttpState>, Path(id): Path<String>) -> impl IntoResponse {
    let cleared = state
        .engine
        .apply_hub_command(HubCommand::ClearKill {
            session_id: id.clone(),
        })
        .await;
    Json(json!({"sessionId": id, "cleared": cleared}))
}

async fn answer_approval(
    State(state): State<HttpState>,
    Path((id, tool_call_id)): Path<(String, String)>,
    Json(body): Json<ApprovalBody>,
) -> Response {
    let command = if body.approved {
        HubCommand::Approve {
            session_id: id.clone(),
            tool_call_id: tool_call_id.clone(),
            option_id: body.option_id,
        }
    } else {
        HubCommand::Deny {
            session_id: id.clone(),
            tool_call_id: tool_call_id.clone(),
            option_id: body.option_id,
        }
    };
    if state.engine.apply_hub_command(command).await {
        Json(json!({"sessionId": id, "toolCallId": tool_call_id, "resolved": true}))
            .into_response()
    } else {
        not_found(format!(
            "No pending approval {} in session {}",
            tool_call_id, id
        ))
    }
}

async fn apply_command(
    State(state): State<HttpState>,
    Json(command): Json<HubCommand>,
) -> impl IntoResponse {
    let applied = state.engine.apply_hub_command(command).await;
    Json(json!({"applied": applied}))
}

fn not_found(message: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": {"code": "NOT_FOUND", "message": message}})),
    )
        .into_response()
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(parsed)
    }
}
