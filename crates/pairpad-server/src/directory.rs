//! Room directory: one lock per room, rooms created on first join and
//! evicted after a grace period once empty.
//!
//! The directory is the serialization point the protocol requires: every
//! operation locks exactly one room's mutex, so operations on the same room
//! run one at a time in acquisition order while unrelated rooms proceed in
//! parallel (the map itself is sharded, there is no process-wide lock).
//!
//! Eviction is a memory-management concern only. When a room's member count
//! reaches zero a task waits out the grace period and removes the state only
//! if the room is still empty - a quick reconnect lands on the surviving
//! state. Durable copies are the persistence collaborator's problem.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{registry::ConnectionRegistry, room::RoomState};

/// Shared map of live rooms. Cheap to clone; clones see the same rooms.
#[derive(Debug, Clone)]
pub struct RoomDirectory {
    rooms: Arc<DashMap<String, Arc<Mutex<RoomState>>>>,
    evict_grace: Duration,
}

impl RoomDirectory {
    /// Create an empty directory with the given eviction grace period.
    pub fn new(evict_grace: Duration) -> Self {
        Self { rooms: Arc::new(DashMap::new()), evict_grace }
    }

    /// Fetch the room for `key`, creating it vacant on first use.
    ///
    /// Joining an unknown key creates the room; joining a known key reuses
    /// it. Callers lock the returned mutex for every operation on the room.
    pub fn open(&self, key: &str) -> Arc<Mutex<RoomState>> {
        self.rooms
            .entry(key.to_string())
            .or_insert_with(|| {
                tracing::info!(room = key, "room created");
                Arc::new(Mutex::new(RoomState::new(key)))
            })
            .clone()
    }

    /// Whether a room currently exists in memory.
    pub fn contains(&self, key: &str) -> bool {
        self.rooms.contains_key(key)
    }

    /// Whether `key` still maps to this exact room instance.
    ///
    /// Registration re-checks this after adding to the registry: a join that
    /// raced the eviction task holds a handle to removed state and must
    /// reopen, otherwise its snapshot and all later frames would operate on
    /// different rooms.
    pub fn resolves_to(&self, key: &str, room: &Arc<Mutex<RoomState>>) -> bool {
        self.rooms.get(key).is_some_and(|entry| Arc::ptr_eq(entry.value(), room))
    }

    /// Number of rooms currently resident.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// True when no rooms are resident.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Start the eviction countdown for a room whose member set just
    /// emptied.
    ///
    /// After the grace period the room is removed only if it is still
    /// empty; any join in the meantime cancels the eviction by virtue of the
    /// recheck. Scheduling twice is harmless.
    pub fn schedule_eviction(&self, key: &str, registry: ConnectionRegistry) {
        let directory = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(directory.evict_grace).await;
            // The recheck runs under the entry's shard lock: a registration
            // either lands before it (nonzero count, entry kept) or observes
            // the removal through `resolves_to` and reopens.
            let removed =
                directory.rooms.remove_if(&key, |_, _| registry.member_count(&key) == 0);
            if removed.is_some() {
                tracing::info!(room = %key, "empty room evicted");
            }
        });
    }
}
