//! Connection registry: which connections belong to which room.
//!
//! The registry is a sharded map from room key to that room's member table,
//! so registering or enumerating connections in one room never contends with
//! another room. Members are back-references only - the authoritative room
//! data lives in [`crate::room::RoomState`], and a connection's outbound
//! queue is owned here as a bounded channel sender.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

/// Runtime-assigned connection identifier, unique for the process lifetime.
pub type ConnectionId = u64;

/// Why an enqueue on a connection's outbound queue did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverError {
    /// The bounded queue is full - the consumer has stalled. Policy: the
    /// connection is dropped, forcing a reconnect and a `join` re-sync.
    QueueFull,
    /// The receiving task is already gone.
    Closed,
}

/// Handle to one member connection: its display identity plus the sending
/// half of its bounded outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    identity: String,
    outbound: mpsc::Sender<String>,
}

impl ConnectionHandle {
    /// Create a handle from an identity and the outbound queue sender.
    pub fn new(identity: impl Into<String>, outbound: mpsc::Sender<String>) -> Self {
        Self { identity: identity.into(), outbound }
    }

    /// Display identity this connection joined under.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Enqueue one serialized frame without blocking.
    pub fn try_deliver(&self, frame: String) -> Result<(), DeliverError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliverError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliverError::Closed,
        })
    }
}

/// Sharded room → members map.
///
/// All methods take `&self`; interior mutability comes from the `DashMap`
/// shard locks, which are held only for the duration of a single map
/// operation (never across I/O).
#[derive(Debug, Default, Clone)]
pub struct ConnectionRegistry {
    rooms: Arc<DashMap<String, HashMap<ConnectionId, ConnectionHandle>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh connection id.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a connection as a member of `room`.
    pub fn add(&self, room: &str, id: ConnectionId, handle: ConnectionHandle) {
        self.rooms.entry(room.to_string()).or_default().insert(id, handle);
    }

    /// Remove a connection from `room`.
    ///
    /// Returns the removed handle, or `None` if the connection was not
    /// registered (removal is idempotent - the queue-full drop path and the
    /// socket-close path may race). An emptied room entry is cleaned up; room
    /// *state* eviction is [`crate::directory::RoomDirectory`]'s job and has
    /// its own grace period.
    pub fn remove(&self, room: &str, id: ConnectionId) -> Option<ConnectionHandle> {
        let removed = self.rooms.get_mut(room).and_then(|mut members| members.remove(&id));
        if removed.is_some() {
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
        removed
    }

    /// Handle for one specific connection in `room`.
    pub fn handle(&self, room: &str, id: ConnectionId) -> Option<ConnectionHandle> {
        self.rooms.get(room).and_then(|members| members.get(&id).cloned())
    }

    /// Snapshot of a room's current members.
    ///
    /// Clones the handles out so callers never hold a shard lock while
    /// enqueueing.
    pub fn members_of(&self, room: &str) -> Vec<(ConnectionId, ConnectionHandle)> {
        self.rooms
            .get(room)
            .map(|members| members.iter().map(|(id, h)| (*id, h.clone())).collect())
            .unwrap_or_default()
    }

    /// Number of live connections in a room.
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    /// Whether any live connection in `room` is bound to `identity`.
    ///
    /// Identities are display names, not unique: this answers "is someone by
    /// that name still here", which gates both lease hand-off targets and the
    /// identity-level disconnect.
    pub fn identity_present(&self, room: &str, identity: &str) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.values().any(|h| h.identity() == identity))
    }
}
