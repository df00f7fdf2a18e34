//! Fan-out of the broadcast channel to every registered connection.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, Frame};
use super::registry::ConnectionRegistry;
use super::HubStats;
use crate::models::Message;

/// Outcome of one fan-out pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Connections in the snapshot for this pass
    pub recipients: usize,
    pub delivered: usize,
    /// Connections closed and removed because their write failed
    pub pruned: usize,
}

/// Single consumer of the broadcast channel.
pub struct Dispatcher {
    rx: mpsc::Receiver<Arc<Message>>,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<HubStats>,
    write_timeout: Duration,
}

impl Dispatcher {
    pub(crate) fn new(
        rx: mpsc::Receiver<Arc<Message>>,
        registry: Arc<ConnectionRegistry>,
        stats: Arc<HubStats>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            rx,
            registry,
            stats,
            write_timeout,
        }
    }

    /// Drain the channel until every publisher is gone or shutdown fires.
    /// Remaining connections are closed on exit.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Dispatcher started (write timeout: {:?})",
            self.write_timeout
        );

        loop {
            tokio::select! {
                message = self.rx.recv() => match message {
                    Some(message) => {
                        self.dispatch(&message).await;
                    }
                    None => {
                        info!("Broadcast channel closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Dispatcher shutting down");
                        break;
                    }
                }
            }
        }

        for connection in self.registry.drain() {
            connection.close();
        }
    }

    /// Receive and dispatch the next message. Returns `None` once the
    /// channel is closed and empty.
    pub async fn dispatch_next(&mut self) -> Option<DispatchReport> {
        let message = self.rx.recv().await?;
        Some(self.dispatch(&message).await)
    }

    /// Deliver one message to every connection in a registry snapshot.
    ///
    /// Writes run concurrently, each bounded by the write timeout, so a
    /// stalled peer costs at most one timeout per pass. A pass finishes
    /// before the next message is taken, which keeps every connection on
    /// the channel's order.
    pub async fn dispatch(&self, message: &Message) -> DispatchReport {
        let frame: Frame = match message.encode() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "failed to encode message, skipping");
                return DispatchReport::default();
            }
        };

        let recipients = self.registry.snapshot();
        let timeout = self.write_timeout;

        let results = join_all(recipients.iter().map(|connection| {
            let frame = Arc::clone(&frame);
            async move { (connection, connection.send(frame, timeout).await) }
        }))
        .await;

        let mut report = DispatchReport {
            recipients: recipients.len(),
            ..DispatchReport::default()
        };

        for (connection, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                // Peer already left through its own session teardown
                Err(e) if connection.is_closed() => {
                    debug!(conn_id = %connection.id(), error = %e, "skipping departed connection");
                    self.registry.remove(&connection.id());
                }
                Err(e) => {
                    warn!(conn_id = %connection.id(), error = %e, "write failed, dropping connection");
                    self.prune(connection);
                    report.pruned += 1;
                }
            }
        }

        self.stats.record_pass(&report);
        debug!(
            kind = message.kind(),
            recipients = report.recipients,
            delivered = report.delivered,
            pruned = report.pruned,
            "broadcast message"
        );

        report
    }

    fn prune(&self, connection: &ClientConnection) {
        connection.close();
        self.registry.remove(&connection.id());
    }
}
