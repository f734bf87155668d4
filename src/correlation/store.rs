//! Concurrency-safe registry of live connections and their correlation keys.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

use crate::correlation::key::{CorrelationKey, KeyGenerator};
use crate::observability::metrics;
use crate::session::connection::{ConnectionHandle, ConnectionId};

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The connection was registered twice. Session-fatal.
    #[error("connection {0} already registered")]
    AlreadyRegistered(ConnectionId),

    /// The connection is not (or no longer) registered. Session-fatal.
    #[error("connection {0} not registered")]
    NotRegistered(ConnectionId),

    /// No registered connection owns the key. Expected when a client
    /// disconnects before its job reports back.
    #[error("correlation key {0} not found")]
    KeyNotFound(CorrelationKey),
}

/// A connection's registration: its outbound handle and the keys it issued.
struct Registration {
    handle: ConnectionHandle,
    keys: HashSet<CorrelationKey>,
}

/// Read-only view of one registration, for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub id: String,
    pub remote: String,
    pub jobs: usize,
}

/// Shared registry between session loops and the notification listener.
///
/// Storage is keyed by connection since keys are minted per connection;
/// [`CorrelationStore::resolve`] therefore scans every registration. Each
/// registration is only ever touched under its shard lock, so a concurrent
/// reader sees a connection either fully registered or fully gone.
///
/// The store never owns a connection: it keeps a clone of the connection's
/// outbound queue handle, which cannot close the underlying socket.
#[derive(Clone, Default)]
pub struct CorrelationStore {
    inner: Arc<DashMap<ConnectionId, Registration>>,
    keys: KeyGenerator,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection with an empty key set.
    pub fn register(&self, conn: &ConnectionHandle) -> Result<(), StoreError> {
        match self.inner.entry(conn.id()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyRegistered(conn.id())),
            Entry::Vacant(slot) => {
                slot.insert(Registration {
                    handle: conn.clone(),
                    keys: HashSet::new(),
                });
                metrics::record_registered_connections(self.inner.len());
                Ok(())
            }
        }
    }

    /// Remove a connection and every key it issued.
    pub fn unregister(&self, id: ConnectionId) -> Result<(), StoreError> {
        self.inner
            .remove(&id)
            .ok_or(StoreError::NotRegistered(id))?;
        metrics::record_registered_connections(self.inner.len());
        Ok(())
    }

    /// Mint a fresh key for a new job on a registered connection.
    pub fn add_job(&self, id: ConnectionId) -> Result<CorrelationKey, StoreError> {
        let mut registration = self
            .inner
            .get_mut(&id)
            .ok_or(StoreError::NotRegistered(id))?;

        loop {
            let key = self
                .keys
                .generate(registration.handle.remote(), SystemTime::now());
            if registration.keys.insert(key.clone()) {
                return Ok(key);
            }
        }
    }

    /// Drop a key whose job never reached the dispatch service.
    pub fn release_job(&self, id: ConnectionId, key: &CorrelationKey) -> Result<(), StoreError> {
        let mut registration = self
            .inner
            .get_mut(&id)
            .ok_or(StoreError::NotRegistered(id))?;

        if registration.keys.remove(key) {
            Ok(())
        } else {
            Err(StoreError::KeyNotFound(key.clone()))
        }
    }

    /// Find the connection that issued `key`.
    pub fn resolve(&self, key: &CorrelationKey) -> Result<ConnectionHandle, StoreError> {
        self.inner
            .iter()
            .find(|r| r.value().keys.contains(key))
            .map(|r| r.value().handle.clone())
            .ok_or_else(|| StoreError::KeyNotFound(key.clone()))
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Keys currently issued by a connection, in no particular order.
    pub fn keys_of(&self, id: ConnectionId) -> Result<Vec<CorrelationKey>, StoreError> {
        self.inner
            .get(&id)
            .map(|r| r.keys.iter().cloned().collect())
            .ok_or(StoreError::NotRegistered(id))
    }

    pub fn summaries(&self) -> Vec<ConnectionSummary> {
        let mut summaries: Vec<_> = self
            .inner
            .iter()
            .map(|r| ConnectionSummary {
                id: r.key().to_string(),
                remote: r.value().handle.remote().to_string(),
                jobs: r.value().keys.len(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn handle(remote: &str) -> ConnectionHandle {
        ConnectionHandle::channel(remote, 8).0
    }

    #[test]
    fn keys_are_distinct_and_resolve_until_unregister() {
        let store = CorrelationStore::new();
        let conn = handle("127.0.0.1:4000");
        store.register(&conn).unwrap();

        let keys: Vec<_> = (0..50).map(|_| store.add_job(conn.id()).unwrap()).collect();
        let distinct: HashSet<_> = keys.iter().cloned().collect();
        assert_eq!(distinct.len(), keys.len());

        for key in &keys {
            assert_eq!(store.resolve(key).unwrap().id(), conn.id());
        }

        store.unregister(conn.id()).unwrap();
        for key in &keys {
            assert_eq!(
                store.resolve(key).unwrap_err(),
                StoreError::KeyNotFound(key.clone())
            );
        }
    }

    #[test]
    fn double_register_keeps_original_keys() {
        let store = CorrelationStore::new();
        let conn = handle("127.0.0.1:4001");
        store.register(&conn).unwrap();
        let key = store.add_job(conn.id()).unwrap();

        assert_eq!(
            store.register(&conn).unwrap_err(),
            StoreError::AlreadyRegistered(conn.id())
        );
        assert_eq!(store.resolve(&key).unwrap().id(), conn.id());
        assert_eq!(store.keys_of(conn.id()).unwrap(), vec![key]);
    }

    #[test]
    fn add_job_on_unregistered_connection_leaves_store_untouched() {
        let store = CorrelationStore::new();
        let registered = handle("127.0.0.1:4002");
        let stranger = handle("127.0.0.1:4003");
        store.register(&registered).unwrap();

        assert_eq!(
            store.add_job(stranger.id()).unwrap_err(),
            StoreError::NotRegistered(stranger.id())
        );
        assert_eq!(store.len(), 1);
        assert!(store.keys_of(registered.id()).unwrap().is_empty());
    }

    #[test]
    fn unregister_unknown_connection_fails() {
        let store = CorrelationStore::new();
        let conn = handle("127.0.0.1:4004");
        assert_eq!(
            store.unregister(conn.id()).unwrap_err(),
            StoreError::NotRegistered(conn.id())
        );
    }

    #[test]
    fn release_job_removes_only_that_key() {
        let store = CorrelationStore::new();
        let conn = handle("127.0.0.1:4005");
        store.register(&conn).unwrap();
        let kept = store.add_job(conn.id()).unwrap();
        let released = store.add_job(conn.id()).unwrap();

        store.release_job(conn.id(), &released).unwrap();
        assert!(store.resolve(&released).is_err());
        assert!(store.resolve(&kept).is_ok());
        assert!(matches!(
            store.release_job(conn.id(), &released),
            Err(StoreError::KeyNotFound(_))
        ));
    }

    #[test]
    fn summaries_report_job_counts() {
        let store = CorrelationStore::new();
        let conn = handle("192.168.1.2:9000");
        store.register(&conn).unwrap();
        store.add_job(conn.id()).unwrap();
        store.add_job(conn.id()).unwrap();

        let summaries = store.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].remote, "192.168.1.2:9000");
        assert_eq!(summaries[0].jobs, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_add_job_never_crosses_key_sets() {
        let store = CorrelationStore::new();
        let a = handle("10.0.0.1:1000");
        let b = handle("10.0.0.2:1000");
        store.register(&a).unwrap();
        store.register(&b).unwrap();

        let mut tasks = Vec::new();
        for conn in [a.clone(), b.clone()] {
            for _ in 0..4 {
                let store = store.clone();
                let id = conn.id();
                tasks.push(tokio::spawn(async move {
                    let mut issued = Vec::new();
                    for _ in 0..250 {
                        issued.push(store.add_job(id).unwrap());
                        tokio::task::yield_now().await;
                    }
                    (id, issued)
                }));
            }
        }

        let mut issued_a = HashSet::new();
        let mut issued_b = HashSet::new();
        for task in tasks {
            let (id, issued) = task.await.unwrap();
            if id == a.id() {
                issued_a.extend(issued);
            } else {
                issued_b.extend(issued);
            }
        }

        let stored_a: HashSet<_> = store.keys_of(a.id()).unwrap().into_iter().collect();
        let stored_b: HashSet<_> = store.keys_of(b.id()).unwrap().into_iter().collect();
        assert_eq!(stored_a, issued_a);
        assert_eq!(stored_b, issued_b);
        assert_eq!(stored_a.len(), 1000);
        assert!(stored_a.is_disjoint(&stored_b));

        for key in &stored_b {
            assert_eq!(store.resolve(key).unwrap().id(), b.id());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn resolve_is_consistent_while_other_connections_churn() {
        let store = CorrelationStore::new();
        let stable = handle("10.0.0.3:1000");
        store.register(&stable).unwrap();
        let stable_keys: Vec<_> = (0..20).map(|_| store.add_job(stable.id()).unwrap()).collect();

        let churn = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut retired = Vec::new();
                for _ in 0..500 {
                    let conn = handle("10.0.0.4:1000");
                    store.register(&conn).unwrap();
                    for _ in 0..4 {
                        let key = store.add_job(conn.id()).unwrap();
                        assert_eq!(store.resolve(&key).unwrap().id(), conn.id());
                        retired.push(key);
                    }
                    tokio::task::yield_now().await;
                    store.unregister(conn.id()).unwrap();
                }
                retired
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let store = store.clone();
                let keys = stable_keys.clone();
                let id = stable.id();
                tokio::spawn(async move {
                    for _ in 0..500 {
                        for key in &keys {
                            assert_eq!(store.resolve(key).unwrap().id(), id);
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let retired = churn.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }

        assert_eq!(store.len(), 1);
        for key in &retired {
            assert!(!stable_keys.contains(key));
            assert_eq!(
                store.resolve(key).unwrap_err(),
                StoreError::KeyNotFound(key.clone())
            );
        }
    }
}
