//! Broadcast WebSocket handler
//!
//! Any client may upgrade. Each upgraded socket joins the hub for its whole
//! lifetime; see [`crate::hub::session`].

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use tracing::warn;

use crate::api::server::AppState;
use crate::hub::session;

/// WebSocket handler for the broadcast stream
pub async fn stream_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let hub = state.hub;

    ws.on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| session::run(socket, hub))
}
