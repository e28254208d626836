//! ConnectionRegistry: the authoritative set of connections eligible to
//! receive fanout.
//!
//! The set is the only state mutated by more than one task: every reader task
//! removes itself on failure, the dispatcher removes recipients whose writes
//! fail, and the accept loop adds new connections.  One `RwLock` guards every
//! mutation and every read-for-iteration.
//!
//! The lock is never held while writing to a connection.  The dispatcher
//! takes a [`ConnectionRegistry::snapshot`], releases the lock, and only then
//! performs the (potentially slow) sends.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::application::sink::{MessageSink, RelayError};
use crate::domain::connection::ConnectionId;

/// One registered connection: its identity plus its write side.
///
/// Cloning a handle is cheap (an `Arc` bump) and is how snapshots are made.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sink: Arc<dyn MessageSink>,
}

impl ConnectionHandle {
    /// Creates a handle for the connection `id` writing through `sink`.
    pub fn new(id: ConnectionId, sink: Arc<dyn MessageSink>) -> Self {
        Self { id, sink }
    }

    /// The connection's identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Sends one encoded message to this connection.
    pub async fn send_text(&self, text: &str) -> Result<(), RelayError> {
        self.sink.send_text(text).await
    }

    /// Closes this connection's transport.
    pub async fn close(&self) {
        self.sink.close().await;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Concurrency-safe set of active connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle`.
    ///
    /// Idempotent: if a handle with the same id is already present the
    /// registry is left unchanged.  Returns `true` if the handle was inserted.
    pub async fn add(&self, handle: ConnectionHandle) -> bool {
        let mut connections = self.connections.write().await;
        match connections.entry(handle.id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    /// Deregisters the connection `id`, returning its handle if it was present.
    ///
    /// Idempotent: a second call for the same id returns `None` and changes
    /// nothing.  Only the caller that receives `Some` owns the lifecycle end
    /// of that connection.
    pub async fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.write().await.remove(&id)
    }

    /// Deregisters `id` and closes its transport if this call removed it.
    ///
    /// When the reader and the dispatcher race to drop the same connection,
    /// exactly one of them closes it.  Returns `true` for that one.
    pub async fn remove_and_close(&self, id: ConnectionId) -> bool {
        // The write lock is released before `close` runs.
        let removed = self.remove(id).await;
        match removed {
            Some(handle) => {
                handle.close().await;
                debug!("connection {id} deregistered and closed");
                true
            }
            None => false,
        }
    }

    /// Returns a point-in-time copy of all registered handles.
    ///
    /// The copy is independent of the live set: connections added or removed
    /// after the call do not affect it.
    pub async fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Removes and returns every registered handle in one step.
    pub async fn drain(&self) -> Vec<ConnectionHandle> {
        self.connections
            .write()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect()
    }

    /// `true` if `id` is currently registered.
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// `true` if no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
