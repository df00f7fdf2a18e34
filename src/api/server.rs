//! HTTP server using Axum
//!
//! Serves the broadcast WebSocket endpoint alongside health and status routes.

use std::net::SocketAddr;
use std::time::Instant;

use axum::middleware::from_fn;
use axum::Router;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ApiServerConfig;
use crate::error::{HubError, Result};
use crate::hub::Hub;

use super::middleware::{cors_layer, RequestLogging};
use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub started_at: Instant,
    pub started_at_utc: DateTime<Utc>,
}

impl AppState {
    pub fn new(hub: Hub) -> Self {
        Self {
            hub,
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
        }
    }
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ApiServerConfig, hub: Hub) -> Self {
        Self {
            config,
            state: AppState::new(hub),
        }
    }

    /// Build the router with CORS and request logging applied
    pub fn build_router(&self) -> Router {
        let cors = cors_layer(&self.config.cors_origins);

        routes::create_router(self.state.clone())
            .layer(from_fn(RequestLogging::log_request))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| HubError::InvalidConfig(format!("Invalid listen address: {}", e)))?;

        let router = self.build_router();

        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| HubError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}
