//! API route definitions

use axum::routing::get;
use axum::Router;

use super::handlers;
use super::server::AppState;
use super::websocket;

/// Create the router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/status", get(handlers::health::status))
        // Broadcast stream, open to any client
        .route("/ws", get(websocket::stream::stream_ws))
        .with_state(state)
}
