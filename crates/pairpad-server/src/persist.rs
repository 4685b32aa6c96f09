//! Persistence collaborator interface.
//!
//! After every committed file mutation the runtime hands the room's file
//! snapshot to a [`Persistence`] implementation. Durability is best-effort
//! relative to the live session: a failing backend is logged and never rolls
//! back or blocks the in-memory operation. The trait is synchronous and
//! called off the room lock.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

/// Errors from a persistence backend.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// The backend rejected or failed the write.
    #[error("persistence backend failure: {0}")]
    Backend(String),
}

/// Sink for committed file snapshots.
///
/// Must be `Clone` (handed to every room task) and `Send + Sync`.
/// Implementations typically share internal state via `Arc`, so clones write
/// to the same backing store.
pub trait Persistence: Clone + Send + Sync + 'static {
    /// Record the full path → content snapshot for a room.
    ///
    /// Invoked once per committed create or accepted edit, with the
    /// post-mutation state. Implementations overwrite the previous snapshot.
    fn persist(&self, room_id: &str, files: &BTreeMap<String, String>)
    -> Result<(), PersistenceError>;
}

/// In-memory persistence for tests and single-process deployments.
///
/// Keeps the latest snapshot per room behind an `Arc<Mutex<..>>`. Uses
/// `lock().expect()`, which panics on a poisoned mutex - acceptable here
/// because no writer panics while holding the lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    snapshots: Arc<Mutex<HashMap<String, BTreeMap<String, String>>>>,
}

impl MemoryPersistence {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest persisted snapshot for a room. `None` if never persisted.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn snapshot(&self, room_id: &str) -> Option<BTreeMap<String, String>> {
        self.snapshots.lock().expect("mutex poisoned").get(room_id).cloned()
    }

    /// Number of rooms with a persisted snapshot.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn room_count(&self) -> usize {
        self.snapshots.lock().expect("mutex poisoned").len()
    }
}

impl Persistence for MemoryPersistence {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn persist(
        &self,
        room_id: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<(), PersistenceError> {
        self.snapshots
            .lock()
            .expect("mutex poisoned")
            .insert(room_id.to_string(), files.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persist_overwrites_previous_snapshot() {
        let store = MemoryPersistence::new();
        let mut files = BTreeMap::new();
        files.insert("a.py".to_string(), "x=1".to_string());
        store.persist("r1", &files).unwrap();

        files.insert("a.py".to_string(), "x=2".to_string());
        store.persist("r1", &files).unwrap();

        let snapshot = store.snapshot("r1").unwrap();
        assert_eq!(snapshot.get("a.py").map(String::as_str), Some("x=2"));
        assert_eq!(store.room_count(), 1);
    }

    #[test]
    fn rooms_are_stored_independently() {
        let store = MemoryPersistence::new();
        store.persist("r1", &BTreeMap::new()).unwrap();
        store.persist("r2", &BTreeMap::new()).unwrap();

        assert_eq!(store.room_count(), 2);
        assert!(store.snapshot("r3").is_none());
    }
}
