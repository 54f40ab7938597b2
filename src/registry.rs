//! Live-connection set for an owning transport.
//!
//! [`ConnectionRegistry`] is the building block a transport uses to track
//! the connections it owns. Entries hold only a [`CloseHandle`], never the
//! connection itself, so the registry cannot keep a finished connection
//! alive; connections remove themselves when they close.

use dashmap::DashMap;

use crate::{connection::CloseHandle, transport::ConnectionId};

/// Concurrent registry of close handles keyed by [`ConnectionId`].
#[derive(Default)]
pub struct ConnectionRegistry(DashMap<ConnectionId, CloseHandle>);

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self(DashMap::new()) }

    /// Insert a handle for a newly constructed connection.
    pub fn insert(&self, handle: CloseHandle) { self.0.insert(handle.id(), handle); }

    /// Retrieve the handle for `id` if the connection is still registered.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<CloseHandle> {
        self.0.get(id).map(|entry| entry.value().clone())
    }

    /// Remove a handle, typically from
    /// [`Transport::remove_connection`][crate::transport::Transport::remove_connection].
    pub fn remove(&self, id: &ConnectionId) -> Option<CloseHandle> {
        self.0.remove(id).map(|(_, handle)| handle)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether the live set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Condemn every registered connection, typically on transport shutdown.
    ///
    /// In-flight exchanges observe the condemnation at their next suspension
    /// point and report it as a timeout.
    pub fn close_all(&self) {
        for entry in &self.0 {
            entry.value().close();
        }
    }
}
