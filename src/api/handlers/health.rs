//! Health and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "wavehub"
        })),
    )
}

/// Hub status: live connections and broadcast counters
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.hub.stats().snapshot();

    Json(json!({
        "connections": state.hub.registry().len(),
        "messages_published": stats.messages_published,
        "messages_dispatched": stats.messages_dispatched,
        "frames_delivered": stats.frames_delivered,
        "connections_pruned": stats.connections_pruned,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "started_at": state.started_at_utc.to_rfc3339(),
    }))
}
