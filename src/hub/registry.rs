//! Live connection set.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::connection::{ClientConnection, ConnectionId};
use crate::error::{HubError, Result};

/// Connections currently eligible for broadcasts, keyed by id.
///
/// Every mutation and every snapshot goes through the same lock. The lock is
/// never held across an `.await`; fan-out iterates a copied snapshot.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
    /// Tracks map size so status queries skip the lock
    active_count: AtomicUsize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Fails if its id is already present.
    pub fn add(&self, connection: Arc<ClientConnection>) -> Result<()> {
        let mut conns = self.connections.write();
        match conns.entry(connection.id()) {
            Entry::Occupied(entry) => Err(HubError::AlreadyRegistered { id: *entry.key() }),
            Entry::Vacant(entry) => {
                debug!(conn_id = %connection.id(), "registered connection");
                entry.insert(connection);
                self.active_count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Unregister a connection. Removing an absent id is a no-op.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let mut conns = self.connections.write();
        let removed = conns.remove(id);
        if removed.is_some() {
            self.active_count.fetch_sub(1, Ordering::Relaxed);
            debug!(conn_id = %id, "unregistered connection");
        }
        removed
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    /// Copy of the current membership, safe to iterate while others mutate.
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Remove every connection at once
    pub fn drain(&self) -> Vec<Arc<ClientConnection>> {
        let mut conns = self.connections.write();
        let drained: Vec<_> = conns.drain().map(|(_, conn)| conn).collect();
        self.active_count.fetch_sub(drained.len(), Ordering::Relaxed);
        drained
    }

    pub fn len(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::sync::mpsc;

    fn make_connection() -> Arc<ClientConnection> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(ClientConnection::new(tx))
    }

    #[test]
    fn test_add_and_remove() {
        let registry = ConnectionRegistry::new();
        let conn = make_connection();

        registry.add(conn.clone()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&conn.id()));

        assert!(registry.remove(&conn.id()).is_some());
        assert!(registry.is_empty());
        assert!(!registry.contains(&conn.id()));
    }

    #[test]
    fn test_duplicate_add_is_rejected() {
        let registry = ConnectionRegistry::new();
        let conn = make_connection();

        registry.add(conn.clone()).unwrap();
        let err = registry.add(conn.clone()).unwrap_err();

        assert!(matches!(err, HubError::AlreadyRegistered { id } if id == conn.id()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_duplicate_id_from_distinct_handle_is_rejected() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);

        registry
            .add(Arc::new(ClientConnection::with_id(id, tx1)))
            .unwrap();
        assert!(registry
            .add(Arc::new(ClientConnection::with_id(id, tx2)))
            .is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_twice_is_noop() {
        let registry = ConnectionRegistry::new();
        let keep = make_connection();
        let gone = make_connection();
        registry.add(keep.clone()).unwrap();
        registry.add(gone.clone()).unwrap();

        assert!(registry.remove(&gone.id()).is_some());
        assert!(registry.remove(&gone.id()).is_none());

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&keep.id()));
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(registry.remove(&ConnectionId::new()).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_snapshot_is_detached_from_later_mutation() {
        let registry = ConnectionRegistry::new();
        let a = make_connection();
        let b = make_connection();
        registry.add(a.clone()).unwrap();
        registry.add(b.clone()).unwrap();

        let snapshot = registry.snapshot();
        registry.remove(&a.id());
        registry.add(make_connection()).unwrap();

        let ids: HashSet<_> = snapshot.iter().map(|c| c.id()).collect();
        assert_eq!(ids, HashSet::from([a.id(), b.id()]));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = ConnectionRegistry::new();
        registry.add(make_connection()).unwrap();
        registry.add(make_connection()).unwrap();

        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_concurrent_add_remove_snapshot() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    let conn = make_connection();
                    registry.add(conn.clone()).unwrap();
                    let snapshot = registry.snapshot();
                    let unique: HashSet<_> = snapshot.iter().map(|c| c.id()).collect();
                    assert_eq!(unique.len(), snapshot.len());
                    registry.remove(&conn.id());
                    registry.remove(&conn.id());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }
}
