//! Per-peer connection handle shared by the registry, the dispatcher and the
//! session loops.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{HubError, Result};

/// Encoded frame shared by every recipient of one dispatch pass
pub type Frame = Arc<str>;

/// Registry key of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Write side of one live peer.
///
/// Frames are pushed into a bounded queue drained by the session's writer
/// loop. Closing flips a one-way flag and wakes both session loops.
#[derive(Debug)]
pub struct ClientConnection {
    id: ConnectionId,
    outbound: mpsc::Sender<Frame>,
    closed: AtomicBool,
    close_signal: watch::Sender<bool>,
    connected_at: DateTime<Utc>,
}

impl ClientConnection {
    pub fn new(outbound: mpsc::Sender<Frame>) -> Self {
        Self::with_id(ConnectionId::new(), outbound)
    }

    pub fn with_id(id: ConnectionId, outbound: mpsc::Sender<Frame>) -> Self {
        let (close_signal, _) = watch::channel(false);
        Self {
            id,
            outbound,
            closed: AtomicBool::new(false),
            close_signal,
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queue a frame, waiting at most `timeout` for room in the queue.
    pub async fn send(&self, frame: Frame, timeout: Duration) -> Result<()> {
        if self.is_closed() {
            return Err(HubError::ConnectionClosed { id: self.id });
        }

        match self.outbound.send_timeout(frame, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(HubError::WriteTimeout {
                id: self.id,
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(SendTimeoutError::Closed(_)) => Err(HubError::ConnectionClosed { id: self.id }),
        }
    }

    /// Mark the connection closed. Returns `true` only for the call that
    /// actually performed the transition.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.close_signal.send_replace(true);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Receiver that flips to `true` once the connection is closed
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.close_signal.subscribe()
    }

    /// Resolves once the connection has been closed
    pub async fn closed(&self) {
        let mut signal = self.closed_signal();
        let _ = signal.wait_for(|closed| *closed).await;
    }
}
