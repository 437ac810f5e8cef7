//! Process-local presence: who is reachable right now.
//!
//! Maps an authenticated identity to its live connection handles. Multiple
//! concurrent sessions per identity (multiple devices) are supported: every
//! registered handle receives pushes. The registry is authoritative only for
//! the lifetime of this process; it is not shared across horizontally
//! scaled instances.

use std::collections::HashMap;

use cove_types::events::GatewayEvent;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

/// A live connection's push endpoint.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl ConnectionHandle {
    pub fn new(conn_id: Uuid, tx: mpsc::UnboundedSender<GatewayEvent>) -> Self {
        Self { conn_id, tx }
    }

    /// Push an event to this connection. Returns false if the connection's
    /// receive loop has already gone away.
    pub fn push(&self, event: GatewayEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// The raw map is never exposed: callers get lookups and snapshots only.
#[derive(Default)]
pub struct PresenceRegistry {
    handles: RwLock<HashMap<Uuid, Vec<ConnectionHandle>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle on successful authentication of a session.
    pub async fn register(&self, user_id: Uuid, handle: ConnectionHandle) {
        let mut handles = self.handles.write().await;
        let entry = handles.entry(user_id).or_default();
        entry.retain(|h| h.conn_id != handle.conn_id);
        entry.push(handle);
        debug!(user = %user_id, connections = entry.len(), "presence registered");
    }

    /// Drop a handle on session termination. The identity's entry is removed
    /// once its last handle goes. Idempotent.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) {
        let mut handles = self.handles.write().await;
        if let Some(entry) = handles.get_mut(&user_id) {
            entry.retain(|h| h.conn_id != conn_id);
            if entry.is_empty() {
                handles.remove(&user_id);
            }
        }
        debug!(user = %user_id, "presence unregistered");
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.handles.read().await.contains_key(&user_id)
    }

    /// Snapshot of the identity's live handles, possibly empty.
    pub async fn handles_for(&self, user_id: Uuid) -> Vec<ConnectionHandle> {
        self.handles
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }
}
