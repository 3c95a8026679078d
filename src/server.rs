//! HTTP server setup and routing
//!
//! One loopback-only axum server carries everything: the player's WebSocket
//! at `/ws`, read-only status endpoints, and the token-gated control
//! endpoints. Read endpoints are open (the listener never leaves
//! 127.0.0.1), but anything that mutates supervisor state requires the
//! per-process API token in the `x-api-token` header.

use crate::error::{Error, Result};
use crate::status::StatusSnapshot;
use crate::store::PersistedState;
use crate::supervisor::Supervisor;
use axum::{
    extract::{ws::WebSocketUpgrade, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub supervisor: Arc<Supervisor>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    uptime_secs: u64,
    host_connected: bool,
    playlist_count: usize,
    #[serde(flatten)]
    engine: StatusSnapshot,
    state: PersistedState,
}

/// Bind the loopback listener and serve until the supervisor shuts down
pub async fn serve(supervisor: Arc<Supervisor>, port: u16) -> Result<()> {
    let ctx = AppContext { supervisor: Arc::clone(&supervisor) };
    let app = build_router(ctx);

    // Loopback only. Exposure to a network goes through a reverse proxy the
    // operator sets up deliberately, never through this bind.
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("cannot bind {addr}: {e}")))?;
    info!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(supervisor.cancelled())
        .await
        .map_err(|e| Error::Http(e.to_string()))?;
    Ok(())
}

pub fn build_router(ctx: AppContext) -> Router {
    let control = Router::new()
        .route("/control/reload", post(reload))
        .route("/control/restart", post(restart))
        .route("/control/recover", post(recover))
        .route_layer(middleware::from_fn_with_state(ctx.clone(), require_token));

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/events/log", get(events_log))
        .route("/ws", get(player_socket))
        .merge(control)
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Gate for mutating endpoints: the per-process API token must match
async fn require_token(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get("x-api-token")
        .and_then(|value| value.to_str().ok());
    if presented != Some(ctx.supervisor.api_token()) {
        warn!("Rejected control request without valid api token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "missing or invalid api token" })),
        )
            .into_response();
    }
    next.run(request).await
}

async fn health() -> &'static str {
    "OK"
}

async fn status(State(ctx): State<AppContext>) -> Json<StatusResponse> {
    let supervisor = &ctx.supervisor;
    Json(StatusResponse {
        uptime_secs: supervisor.uptime().as_secs(),
        host_connected: supervisor.host_connected().await,
        playlist_count: supervisor.config().await.playlists.len(),
        engine: supervisor.status_snapshot().await,
        state: supervisor.store().get(),
    })
}

async fn events_log(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    Json(json!({ "events": ctx.supervisor.event_log().snapshot() }))
}

/// The player page's WebSocket endpoint
async fn player_socket(State(ctx): State<AppContext>, ws: WebSocketUpgrade) -> Response {
    let transport = ctx.supervisor.player();
    ws.on_upgrade(move |socket| transport.run_client(socket))
}

async fn reload(State(ctx): State<AppContext>) -> Response {
    match ctx.supervisor.reload_config().await {
        Ok(()) => Json(json!({ "reloaded": true })).into_response(),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "reloaded": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn restart(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    ctx.supervisor.trigger_restart().await;
    Json(json!({ "restarting": true }))
}

async fn recover(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    ctx.supervisor.kick_recovery().await;
    Json(json!({ "recovery": "requested" }))
}
