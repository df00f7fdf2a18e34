//! Wavehub - Entry Point
//!
//! Starts the broadcast dispatcher, the synthetic producer and the HTTP server
//! with graceful shutdown support.

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use wavehub::api::ApiServer;
use wavehub::config::{Config, LogConfig};
use wavehub::hub::Hub;
use wavehub::services::{SyntheticProducer, SyntheticProducerHandle};

#[tokio::main]
async fn main() -> wavehub::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log);

    info!("Starting Wavehub");

    // Create the hub and its dispatcher
    let (hub, dispatcher) = Hub::new(config.hub.clone());
    info!(
        "Hub ready (channel capacity: {}, write timeout: {}ms)",
        config.hub.channel_capacity, config.hub.write_timeout_ms
    );

    // Create shutdown channel
    let (shutdown_tx, _) = watch::channel(false);

    // Start dispatcher
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_tx.subscribe()));

    // Start synthetic producer
    let (producer_handle, producer_shutdown) = SyntheticProducerHandle::new();
    let producer_task = if config.producer.enabled {
        let producer = SyntheticProducer::new(hub.publisher(), config.producer.clone());
        Some(tokio::spawn(async move {
            producer.run(producer_shutdown).await;
        }))
    } else {
        info!("Synthetic producer disabled");
        None
    };

    // Create API server
    let api_server = ApiServer::new(config.api.clone(), hub.clone());
    let api_shutdown = shutdown_tx.subscribe();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!("Server started - listening on {}", config.listen_addr());

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    // Stop producers first, then the server and dispatcher
    producer_handle.shutdown();
    let _ = shutdown_tx.send(true);

    if let Some(task) = producer_task {
        let _ = task.await;
    }
    let _ = tokio::join!(api_task, dispatcher_task);

    info!("Wavehub stopped");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over `LOG_LEVEL`.
fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("wavehub={},tower_http=debug", log.level).into());

    let fmt_layer = if log.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
