//! Broadcast hub
//!
//! Every message, whether it comes from a connected peer or from an internal
//! producer, goes through one ordered channel. A single [`Dispatcher`] drains
//! that channel and writes each message to every connection in the
//! [`ConnectionRegistry`], pruning peers whose writes fail.
//!
//! ```text
//! reader loops ─┐
//!               ├─> Publisher ─> channel ─> Dispatcher ─> ClientConnection (xN)
//! producers ────┘
//! ```

mod connection;
mod dispatcher;
mod registry;
pub mod session;

pub use connection::{ClientConnection, ConnectionId, Frame};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use registry::ConnectionRegistry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::HubConfig;
use crate::error::{HubError, Result};
use crate::models::Message;

/// Process-wide hub handle. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    registry: Arc<ConnectionRegistry>,
    publisher: Publisher,
    stats: Arc<HubStats>,
    config: HubConfig,
}

impl Hub {
    /// Create the hub and the dispatcher that serves it.
    ///
    /// The dispatcher must be spawned for messages to reach any connection.
    pub fn new(config: HubConfig) -> (Self, Dispatcher) {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let registry = Arc::new(ConnectionRegistry::new());
        let stats = Arc::new(HubStats::default());

        let dispatcher = Dispatcher::new(
            rx,
            Arc::clone(&registry),
            Arc::clone(&stats),
            config.write_timeout(),
        );

        let hub = Self {
            registry,
            publisher: Publisher {
                tx,
                stats: Arc::clone(&stats),
            },
            stats,
            config,
        };

        (hub, dispatcher)
    }

    /// Write handle onto the broadcast channel
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &HubStats {
        &self.stats
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a new connection and hand back the receiving end of its
    /// outbound queue.
    pub fn open_connection(&self) -> Result<(Arc<ClientConnection>, mpsc::Receiver<Frame>)> {
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        let connection = Arc::new(ClientConnection::new(tx));
        self.registry.add(Arc::clone(&connection))?;
        Ok((connection, rx))
    }

    /// Close and unregister a connection. Safe to call any number of times.
    pub fn disconnect(&self, connection: &ClientConnection) {
        let closed = connection.close();
        let removed = self.registry.remove(&connection.id()).is_some();
        debug!(conn_id = %connection.id(), closed, removed, "disconnect");
    }
}

/// Producer-side handle onto the broadcast channel.
///
/// Holds no reference to the registry; publishing only enqueues.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::Sender<Arc<Message>>,
    stats: Arc<HubStats>,
}

impl Publisher {
    /// Enqueue a message, waiting for room if the channel is full.
    pub async fn publish(&self, message: Message) -> Result<()> {
        self.publish_shared(Arc::new(message)).await
    }

    pub async fn publish_shared(&self, message: Arc<Message>) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| HubError::ChannelClosed)?;
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Running counters for the status endpoint
#[derive(Debug, Default)]
pub struct HubStats {
    published: AtomicU64,
    dispatched: AtomicU64,
    delivered: AtomicU64,
    pruned: AtomicU64,
}

impl HubStats {
    pub(crate) fn record_pass(&self, report: &DispatchReport) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.pruned.fetch_add(report.pruned as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HubStatsSnapshot {
        HubStatsSnapshot {
            messages_published: self.published.load(Ordering::Relaxed),
            messages_dispatched: self.dispatched.load(Ordering::Relaxed),
            frames_delivered: self.delivered.load(Ordering::Relaxed),
            connections_pruned: self.pruned.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStatsSnapshot {
    pub messages_published: u64,
    pub messages_dispatched: u64,
    pub frames_delivered: u64,
    pub connections_pruned: u64,
}
