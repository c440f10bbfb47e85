//! Registry of live listener connections and their filter criteria.
//!
//! All reads and writes go through one mutex. A broadcast pass holds it for
//! the whole pass, so a pass sees either the old or the new criteria of a
//! connection (never a mix) and never writes to a connection that was
//! removed before the pass started. Sends during a pass are non-blocking
//! queue pushes, so holding the lock does not wait on any socket.

use std::collections::HashMap;
use std::sync::Arc;

use kickoff_core::{ConnectionId, FilterCriteria};
use kickoff_telemetry::names;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why a frame could not be queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendError {
    /// The connection's outbound queue is at capacity.
    Full,
    /// The connection's writer is gone.
    Closed,
}

/// Sending side of one connection.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains.
    pub fn new(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id,
            tx,
            cancel: CancellationToken::new(),
        };
        (handle, rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, frame: String) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Signal the connection's tasks to shut down. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// True when both handles feed the same outbound queue.
    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Token cancelled when the connection is closing.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// What a fan-out callback did with one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Skipped,
    Dropped,
    /// The connection is unusable and must be removed.
    Failed,
}

struct Entry {
    handle: ConnectionHandle,
    criteria: Arc<FilterCriteria>,
}

/// Thread-safe map of connection id to handle and criteria.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<ConnectionId, Entry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection with wildcard criteria. Re-registering an id
    /// replaces the previous entry and resets its criteria. A displaced
    /// handle is closed unless it is the same connection.
    pub fn register(&self, handle: ConnectionHandle) {
        let mut entries = self.entries.lock();
        let id = handle.id().clone();
        let entry = Entry {
            handle,
            criteria: Arc::new(FilterCriteria::wildcard()),
        };
        let displaced = entries.insert(id.clone(), entry);
        if let (Some(previous), Some(current)) = (displaced, entries.get(&id)) {
            if !previous.handle.same_connection(&current.handle) {
                previous.handle.close();
            }
        }
        metrics::gauge!(names::WS_CONNECTIONS_ACTIVE).set(entries.len() as f64);
    }

    /// Replace a connection's criteria wholesale. Returns `false` if the
    /// connection is not registered.
    pub fn update_filter(&self, id: &ConnectionId, criteria: FilterCriteria) -> bool {
        match self.entries.lock().get_mut(id) {
            Some(entry) => {
                entry.criteria = Arc::new(criteria);
                true
            }
            None => false,
        }
    }

    /// Remove a connection. Later broadcast passes will not see it.
    pub fn remove(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        let mut entries = self.entries.lock();
        let removed = entries.remove(id).map(|entry| entry.handle);
        if removed.is_some() {
            metrics::gauge!(names::WS_CONNECTIONS_ACTIVE).set(entries.len() as f64);
        }
        removed
    }

    /// Remove `handle` only if it is still the registered entry for its id.
    /// A newer connection registered under the same id is left alone.
    pub fn remove_handle(&self, handle: &ConnectionHandle) -> bool {
        let mut entries = self.entries.lock();
        let current = entries
            .get(handle.id())
            .is_some_and(|entry| entry.handle.same_connection(handle));
        if current {
            entries.remove(handle.id());
            metrics::gauge!(names::WS_CONNECTIONS_ACTIVE).set(entries.len() as f64);
        }
        current
    }

    pub fn criteria(&self, id: &ConnectionId) -> Option<Arc<FilterCriteria>> {
        self.entries
            .lock()
            .get(id)
            .map(|entry| Arc::clone(&entry.criteria))
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Point-in-time copy of every connection and its criteria.
    pub fn snapshot(&self) -> Vec<(ConnectionHandle, Arc<FilterCriteria>)> {
        self.entries
            .lock()
            .values()
            .map(|entry| (entry.handle.clone(), Arc::clone(&entry.criteria)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Run `deliver` once per registered connection while holding the
    /// registry lock. Connections for which it returns [`Delivery::Failed`]
    /// are removed before the lock is released; their handles are returned
    /// so the caller can close them.
    ///
    /// `deliver` must not block and must not call back into the registry.
    pub fn fan_out<F>(&self, mut deliver: F) -> Vec<ConnectionHandle>
    where
        F: FnMut(&ConnectionHandle, &FilterCriteria) -> Delivery,
    {
        let mut entries = self.entries.lock();
        let failed: Vec<ConnectionId> = entries
            .iter()
            .filter(|(_, entry)| deliver(&entry.handle, &entry.criteria) == Delivery::Failed)
            .map(|(id, _)| id.clone())
            .collect();

        let removed: Vec<ConnectionHandle> = failed
            .iter()
            .filter_map(|id| entries.remove(id))
            .map(|entry| entry.handle)
            .collect();
        if !removed.is_empty() {
            metrics::gauge!(names::WS_CONNECTIONS_ACTIVE).set(entries.len() as f64);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str) -> (ConnectionHandle, mpsc::Receiver<String>) {
        ConnectionHandle::new(ConnectionId::from_raw(id), 4)
    }

    #[test]
    fn register_starts_with_wildcard() {
        let registry = ConnectionRegistry::new();
        let (h, _rx) = handle("c1");
        registry.register(h);

        assert_eq!(registry.len(), 1);
        let criteria = registry.criteria(&ConnectionId::from_raw("c1")).unwrap();
        assert!(criteria.is_wildcard());
    }

    #[test]
    fn update_filter_replaces_criteria() {
        let registry = ConnectionRegistry::new();
        let (h, _rx) = handle("c1");
        registry.register(h);
        let id = ConnectionId::from_raw("c1");

        assert!(registry.update_filter(&id, FilterCriteria::new(["PL", "SA"], ["LIVE"])));
        assert!(registry.update_filter(&id, FilterCriteria::new(["BL1"], Vec::<String>::new())));

        let criteria = registry.criteria(&id).unwrap();
        assert_eq!(*criteria, FilterCriteria::new(["BL1"], Vec::<String>::new()));
    }

    #[test]
    fn update_filter_unknown_connection() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.update_filter(&ConnectionId::from_raw("ghost"), FilterCriteria::wildcard()));
        assert!(registry.is_empty());
    }

    #[test]
    fn re_register_resets_criteria_and_closes_previous() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::from_raw("c1");
        let (first, _rx1) = handle("c1");
        let first_token = first.cancellation();
        registry.register(first);
        assert!(registry.update_filter(&id, FilterCriteria::new(["PL"], Vec::<String>::new())));

        let (second, _rx2) = handle("c1");
        registry.register(second);
        assert_eq!(registry.len(), 1);
        assert!(registry.criteria(&id).unwrap().is_wildcard());
        assert!(first_token.is_cancelled());
    }

    #[test]
    fn re_register_same_handle_keeps_it_open() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::from_raw("c1");
        let (h, mut rx) = handle("c1");
        let token = h.cancellation();
        registry.register(h.clone());
        registry.register(h.clone());

        assert_eq!(registry.len(), 1);
        assert!(!token.is_cancelled());
        assert!(!h.is_closed());
        assert!(registry.contains(&id));
        assert!(h.try_send("frame".into()).is_ok());
        assert_eq!(rx.try_recv().unwrap(), "frame");
    }

    #[test]
    fn remove_handle_leaves_newer_connection() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::from_raw("c1");
        let (stale, _rx1) = handle("c1");
        registry.register(stale.clone());
        let (fresh, _rx2) = handle("c1");
        let fresh_token = fresh.cancellation();
        registry.register(fresh.clone());

        assert!(!registry.remove_handle(&stale));
        assert!(registry.contains(&id));
        assert!(!fresh_token.is_cancelled());

        assert!(registry.remove_handle(&fresh));
        assert!(registry.is_empty());
        assert!(!registry.remove_handle(&fresh));
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (h, _rx) = handle("c1");
        registry.register(h);
        let id = ConnectionId::from_raw("c1");

        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(!registry.contains(&id));
        assert!(registry.criteria(&id).is_none());
    }

    #[test]
    fn fan_out_skips_removed_connection() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = handle("a");
        let (b, mut rx_b) = handle("b");
        registry.register(a);
        registry.register(b);
        let _ = registry.remove(&ConnectionId::from_raw("b"));

        let failed = registry.fan_out(|h, _| {
            h.try_send(format!("to {}", h.id())).unwrap();
            Delivery::Sent
        });

        assert!(failed.is_empty());
        assert_eq!(rx_a.try_recv().unwrap(), "to a");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn fan_out_removes_failed_connections() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = handle("a");
        let (b, rx_b) = handle("b");
        registry.register(a);
        registry.register(b);
        drop(rx_b);

        let failed = registry.fan_out(|h, _| match h.try_send("x".into()) {
            Ok(()) => Delivery::Sent,
            Err(SendError::Full) => Delivery::Dropped,
            Err(SendError::Closed) => Delivery::Failed,
        });

        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id().as_str(), "b");
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&ConnectionId::from_raw("a")));
    }

    #[test]
    fn try_send_reports_full_queue() {
        let (h, _rx) = ConnectionHandle::new(ConnectionId::from_raw("slow"), 1);
        assert_eq!(h.try_send("one".into()), Ok(()));
        assert_eq!(h.try_send("two".into()), Err(SendError::Full));
        assert!(!h.is_closed());
    }

    #[test]
    fn close_cancels_token() {
        let (h, _rx) = handle("c1");
        let token = h.cancellation();
        h.close();
        h.close();
        assert!(token.is_cancelled());
        assert!(h.is_closed());
    }

    #[test]
    fn snapshot_copies_criteria() {
        let registry = ConnectionRegistry::new();
        let (h, _rx) = handle("c1");
        registry.register(h);
        let id = ConnectionId::from_raw("c1");

        let snap = registry.snapshot();
        assert!(registry.update_filter(&id, FilterCriteria::new(["PL"], Vec::<String>::new())));

        assert_eq!(snap.len(), 1);
        assert!(snap[0].1.is_wildcard());
        assert!(!registry.criteria(&id).unwrap().is_wildcard());
    }

    #[test]
    fn concurrent_register_and_remove() {
        let registry = Arc::new(ConnectionRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let id = format!("t{t}-{i}");
                        let (h, _rx) = handle(&id);
                        registry.register(h);
                        if i % 2 == 0 {
                            let _ = registry.remove(&ConnectionId::from_raw(id));
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(registry.len(), 8 * 50);
    }
}
