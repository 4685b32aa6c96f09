//! Room state and the single-writer lease machine.
//!
//! [`RoomState`] owns one room's canonical data: the file map, the lease
//! holder, and the ordered pending-request queue. Operations mutate the state
//! and return [`RoomAction`]s for the runtime to execute; the state itself
//! never touches the network. Serialization is the caller's job - every
//! operation on one room runs under that room's lock, so actions come out in
//! commit order.
//!
//! Lease machine (`Vacant` ⇄ `Held`):
//! - `request_turn` on a vacant room grants immediately, no approval round
//!   trip
//! - `approve_turn`/`deny_turn` are editor-only
//! - editor disconnect vacates the lease without promoting the next
//!   requester; survivors must re-request and the vacancy rule then applies

use std::collections::BTreeMap;

use pairpad_proto::ServerEnvelope;

use crate::fanout::DeliveryMode;

/// One in-memory file: full text plus a per-path write counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Full content; edits replace it wholesale, never a diff.
    pub content: String,
    /// Incremented on every accepted write. Starts at 1 on creation.
    pub version: u64,
}

/// Outcome of a room operation, executed by the runtime after the state
/// mutation committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomAction {
    /// Enqueue an envelope on the outbound queues selected by `mode`.
    Deliver {
        /// Which subset of the room receives the envelope.
        mode: DeliveryMode,
        /// The envelope to serialize and enqueue.
        envelope: ServerEnvelope,
    },

    /// Hand the post-mutation file snapshot to the persistence collaborator.
    /// Best-effort: failures are logged, never rolled back.
    Persist {
        /// Path → content at commit time.
        files: BTreeMap<String, String>,
    },
}

/// Errors from room operations.
///
/// None of these are fatal: the router drops or privately reports the
/// offending frame and the room state is untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// `file_create` for a path that already exists; caller must edit instead.
    #[error("file already exists: {0}")]
    AlreadyExists(String),

    /// `code` for a path the room has never seen.
    #[error("no such file: {0}")]
    FileNotFound(String),

    /// A lease-gated operation from someone who does not hold the lease.
    #[error("'{0}' does not hold the edit lease")]
    NotAuthorized(String),
}

/// Authoritative per-room state.
///
/// Invariants (hold after every operation):
/// - `editor` is empty or exactly one identity
/// - `pending` has no duplicates and never contains the editor
/// - file versions only move forward, and only through [`Self::create_file`]
///   and [`Self::edit_file`]
#[derive(Debug)]
pub struct RoomState {
    key: String,
    files: BTreeMap<String, FileEntry>,
    editor: Option<String>,
    pending: Vec<String>,
}

impl RoomState {
    /// Create an empty room. The lease starts vacant.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), files: BTreeMap::new(), editor: None, pending: Vec::new() }
    }

    /// Room key this state belongs to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current lease holder, if any.
    pub fn editor(&self) -> Option<&str> {
        self.editor.as_deref()
    }

    /// Pending lease requests in arrival order.
    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    /// Version counter for a path. `None` if the file does not exist.
    pub fn file_version(&self, path: &str) -> Option<u64> {
        self.files.get(path).map(|f| f.version)
    }

    /// Content of a path. `None` if the file does not exist.
    pub fn file_content(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|f| f.content.as_str())
    }

    /// Full `{editor, files}` snapshot for a joining member.
    ///
    /// Reads only; joining never alters the lease or the pending queue, so a
    /// repeated `join` from the same connection is idempotent.
    pub fn snapshot(&self) -> ServerEnvelope {
        ServerEnvelope::Ready { editor: self.editor.clone(), files: self.files_snapshot() }
    }

    /// Path → content map at this instant.
    pub fn files_snapshot(&self) -> BTreeMap<String, String> {
        self.files.iter().map(|(p, f)| (p.clone(), f.content.clone())).collect()
    }

    /// Create a new file. Open to any member - file creation is how an empty
    /// room gets bootstrapped, so it is not lease-gated.
    pub fn create_file(
        &mut self,
        path: &str,
        content: &str,
    ) -> Result<Vec<RoomAction>, RoomError> {
        if self.files.contains_key(path) {
            return Err(RoomError::AlreadyExists(path.to_string()));
        }

        self.files
            .insert(path.to_string(), FileEntry { content: content.to_string(), version: 1 });
        tracing::debug!(room = %self.key, path, "file created");

        Ok(vec![
            RoomAction::Deliver {
                mode: DeliveryMode::All,
                envelope: ServerEnvelope::FileCreate {
                    path: path.to_string(),
                    content: content.to_string(),
                    version: 1,
                },
            },
            RoomAction::Persist { files: self.files_snapshot() },
        ])
    }

    /// Replace the content of an existing file. Editor only.
    ///
    /// The accepted write is echoed to all members, sender included, so every
    /// replica converges strictly through server broadcasts.
    pub fn edit_file(
        &mut self,
        identity: &str,
        path: &str,
        content: &str,
    ) -> Result<Vec<RoomAction>, RoomError> {
        if self.editor.as_deref() != Some(identity) {
            return Err(RoomError::NotAuthorized(identity.to_string()));
        }

        let entry = self
            .files
            .get_mut(path)
            .ok_or_else(|| RoomError::FileNotFound(path.to_string()))?;
        entry.content = content.to_string();
        entry.version += 1;
        let version = entry.version;

        Ok(vec![
            RoomAction::Deliver {
                mode: DeliveryMode::All,
                envelope: ServerEnvelope::Code {
                    path: path.to_string(),
                    content: content.to_string(),
                    version,
                },
            },
            RoomAction::Persist { files: self.files_snapshot() },
        ])
    }

    /// Request the edit lease.
    ///
    /// Vacant room: the lease is granted on the spot and the change is
    /// broadcast. Held room: the identity queues up (once) and only the
    /// current editor hears about it. A request from the editor is a no-op.
    pub fn request_turn(&mut self, identity: &str) -> Vec<RoomAction> {
        match self.editor.as_deref() {
            None => {
                self.editor = Some(identity.to_string());
                self.pending.retain(|p| p != identity);
                tracing::info!(room = %self.key, editor = identity, "lease granted on vacancy");
                vec![RoomAction::Deliver {
                    mode: DeliveryMode::All,
                    envelope: ServerEnvelope::TurnUpdate { editor: Some(identity.to_string()) },
                }]
            },
            Some(editor) if editor == identity => Vec::new(),
            Some(editor) => {
                if self.pending.iter().any(|p| p == identity) {
                    return Vec::new();
                }
                self.pending.push(identity.to_string());
                vec![RoomAction::Deliver {
                    mode: DeliveryMode::Targeted(editor.to_string()),
                    envelope: ServerEnvelope::RequestTurn { identity: identity.to_string() },
                }]
            },
        }
    }

    /// Editor hands the lease to `target`.
    ///
    /// `target` need not have requested; a pending entry is consumed if one
    /// exists. Membership of the target is checked by the router, which knows
    /// the connection set - the state machine only re-validates authority.
    pub fn approve_turn(
        &mut self,
        identity: &str,
        target: &str,
    ) -> Result<Vec<RoomAction>, RoomError> {
        if self.editor.as_deref() != Some(identity) {
            return Err(RoomError::NotAuthorized(identity.to_string()));
        }

        self.pending.retain(|p| p != target);
        self.editor = Some(target.to_string());
        tracing::info!(room = %self.key, from = identity, to = target, "lease transferred");

        Ok(vec![RoomAction::Deliver {
            mode: DeliveryMode::All,
            envelope: ServerEnvelope::TurnUpdate { editor: Some(target.to_string()) },
        }])
    }

    /// Editor rejects `target`'s pending request. Only the target hears.
    pub fn deny_turn(
        &mut self,
        identity: &str,
        target: &str,
    ) -> Result<Vec<RoomAction>, RoomError> {
        if self.editor.as_deref() != Some(identity) {
            return Err(RoomError::NotAuthorized(identity.to_string()));
        }

        self.pending.retain(|p| p != target);

        Ok(vec![RoomAction::Deliver {
            mode: DeliveryMode::Targeted(target.to_string()),
            envelope: ServerEnvelope::DenyTurn { target: target.to_string() },
        }])
    }

    /// A member's last connection dropped.
    ///
    /// The identity leaves the pending queue unconditionally. If it held the
    /// lease the room goes vacant and everyone still present hears
    /// `turn_update{editor: null}` - deliberately no promotion of the next
    /// requester, keeping the vacancy rule in `request_turn` the single grant
    /// path.
    pub fn disconnect(&mut self, identity: &str) -> Vec<RoomAction> {
        self.pending.retain(|p| p != identity);

        if self.editor.as_deref() == Some(identity) {
            self.editor = None;
            tracing::info!(room = %self.key, editor = identity, "lease vacated by disconnect");
            return vec![RoomAction::Deliver {
                mode: DeliveryMode::All,
                envelope: ServerEnvelope::TurnUpdate { editor: None },
            }];
        }

        Vec::new()
    }

    /// Relay a suggestion to whoever currently holds the lease.
    ///
    /// No authorization on the author, nothing stored, nothing replayed: a
    /// suggestion is a notification, not a queue. Vacant room: dropped.
    pub fn submit_suggestion(&self, author: &str, path: &str, content: &str) -> Vec<RoomAction> {
        match self.editor.as_deref() {
            Some(editor) => vec![RoomAction::Deliver {
                mode: DeliveryMode::Targeted(editor.to_string()),
                envelope: ServerEnvelope::Suggestion {
                    author: author.to_string(),
                    path: path.to_string(),
                    content: content.to_string(),
                },
            }],
            None => {
                tracing::debug!(room = %self.key, author, "suggestion dropped, lease vacant");
                Vec::new()
            },
        }
    }

    /// Relay a chat line to the whole room. Routed through the room state so
    /// chat observes the same per-room ordering as every other event.
    pub fn chat(&self, identity: &str, text: &str) -> Vec<RoomAction> {
        vec![RoomAction::Deliver {
            mode: DeliveryMode::All,
            envelope: ServerEnvelope::Chat {
                identity: identity.to_string(),
                text: text.to_string(),
            },
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn_update_to_all(actions: &[RoomAction], expected: Option<&str>) -> bool {
        actions.iter().any(|a| {
            matches!(a, RoomAction::Deliver {
                mode: DeliveryMode::All,
                envelope: ServerEnvelope::TurnUpdate { editor },
            } if editor.as_deref() == expected)
        })
    }

    #[test]
    fn vacant_request_grants_immediately() {
        let mut room = RoomState::new("r1");

        let actions = room.request_turn("alice");

        assert_eq!(room.editor(), Some("alice"));
        assert!(room.pending().is_empty());
        assert!(turn_update_to_all(&actions, Some("alice")));
    }

    #[test]
    fn request_while_held_queues_and_notifies_editor_only() {
        let mut room = RoomState::new("r1");
        room.request_turn("alice");

        let actions = room.request_turn("bob");

        assert_eq!(room.editor(), Some("alice"));
        assert_eq!(room.pending(), ["bob".to_string()]);
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            RoomAction::Deliver {
                mode: DeliveryMode::Targeted(t),
                envelope: ServerEnvelope::RequestTurn { identity },
            } if t == "alice" && identity == "bob"
        ));
    }

    #[test]
    fn duplicate_request_is_silent() {
        let mut room = RoomState::new("r1");
        room.request_turn("alice");
        room.request_turn("bob");

        assert!(room.request_turn("bob").is_empty());
        assert_eq!(room.pending(), ["bob".to_string()]);
    }

    #[test]
    fn editor_requesting_again_is_noop() {
        let mut room = RoomState::new("r1");
        room.request_turn("alice");

        assert!(room.request_turn("alice").is_empty());
        assert_eq!(room.editor(), Some("alice"));
        assert!(room.pending().is_empty());
    }

    #[test]
    fn approve_transfers_lease_and_clears_pending_entry() {
        let mut room = RoomState::new("r1");
        room.request_turn("alice");
        room.request_turn("bob");

        let actions = room.approve_turn("alice", "bob").unwrap();

        assert_eq!(room.editor(), Some("bob"));
        assert!(room.pending().is_empty());
        assert!(turn_update_to_all(&actions, Some("bob")));
    }

    #[test]
    fn approve_from_non_editor_is_rejected() {
        let mut room = RoomState::new("r1");
        room.request_turn("alice");

        let result = room.approve_turn("bob", "bob");

        assert!(matches!(result, Err(RoomError::NotAuthorized(_))));
        assert_eq!(room.editor(), Some("alice"));
    }

    #[test]
    fn approve_works_for_target_that_never_requested() {
        let mut room = RoomState::new("r1");
        room.request_turn("alice");

        let actions = room.approve_turn("alice", "carol").unwrap();

        assert_eq!(room.editor(), Some("carol"));
        assert!(turn_update_to_all(&actions, Some("carol")));
    }

    #[test]
    fn deny_removes_request_and_notifies_target_only() {
        let mut room = RoomState::new("r1");
        room.request_turn("alice");
        room.request_turn("bob");

        let actions = room.deny_turn("alice", "bob").unwrap();

        assert_eq!(room.editor(), Some("alice"));
        assert!(room.pending().is_empty());
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            RoomAction::Deliver {
                mode: DeliveryMode::Targeted(t),
                envelope: ServerEnvelope::DenyTurn { target },
            } if t == "bob" && target == "bob"
        ));
    }

    #[test]
    fn editor_disconnect_vacates_without_promotion() {
        let mut room = RoomState::new("r1");
        room.request_turn("alice");
        room.request_turn("bob");

        let actions = room.disconnect("alice");

        assert_eq!(room.editor(), None);
        // bob must re-request; the vacancy rule will then grant.
        assert_eq!(room.pending(), ["bob".to_string()]);
        assert!(turn_update_to_all(&actions, None));
    }

    #[test]
    fn bystander_disconnect_only_clears_queue_entry() {
        let mut room = RoomState::new("r1");
        room.request_turn("alice");
        room.request_turn("bob");

        let actions = room.disconnect("bob");

        assert_eq!(room.editor(), Some("alice"));
        assert!(room.pending().is_empty());
        assert!(actions.is_empty());
    }

    #[test]
    fn create_then_edit_increments_version() {
        let mut room = RoomState::new("r1");
        room.request_turn("eve");

        room.create_file("a.py", "x=1").unwrap();
        assert_eq!(room.file_version("a.py"), Some(1));

        room.edit_file("eve", "a.py", "x=2").unwrap();
        assert_eq!(room.file_version("a.py"), Some(2));
        assert_eq!(room.file_content("a.py"), Some("x=2"));
    }

    #[test]
    fn create_duplicate_path_fails() {
        let mut room = RoomState::new("r1");
        room.create_file("a.py", "x=1").unwrap();

        let result = room.create_file("a.py", "y=2");

        assert!(matches!(result, Err(RoomError::AlreadyExists(_))));
        assert_eq!(room.file_content("a.py"), Some("x=1"));
    }

    #[test]
    fn edit_from_non_editor_changes_nothing() {
        let mut room = RoomState::new("r1");
        room.request_turn("eve");
        room.create_file("a.py", "x=1").unwrap();

        let result = room.edit_file("mallory", "a.py", "x=666");

        assert!(matches!(result, Err(RoomError::NotAuthorized(_))));
        assert_eq!(room.file_content("a.py"), Some("x=1"));
        assert_eq!(room.file_version("a.py"), Some(1));
    }

    #[test]
    fn edit_unknown_path_is_not_found() {
        let mut room = RoomState::new("r1");
        room.request_turn("eve");

        let result = room.edit_file("eve", "ghost.py", "x=1");

        assert!(matches!(result, Err(RoomError::FileNotFound(_))));
    }

    #[test]
    fn accepted_edit_persists_snapshot() {
        let mut room = RoomState::new("r1");
        room.request_turn("eve");
        room.create_file("a.py", "x=1").unwrap();

        let actions = room.edit_file("eve", "a.py", "x=2").unwrap();

        let persisted = actions.iter().find_map(|a| match a {
            RoomAction::Persist { files } => Some(files.clone()),
            RoomAction::Deliver { .. } => None,
        });
        assert_eq!(persisted.unwrap().get("a.py").map(String::as_str), Some("x=2"));
    }

    #[test]
    fn suggestion_goes_to_editor_only() {
        let mut room = RoomState::new("r1");
        room.request_turn("eve");

        let actions = room.submit_suggestion("fay", "a.py", "x=3");

        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            RoomAction::Deliver {
                mode: DeliveryMode::Targeted(t),
                envelope: ServerEnvelope::Suggestion { author, .. },
            } if t == "eve" && author == "fay"
        ));
    }

    #[test]
    fn suggestion_in_vacant_room_is_dropped() {
        let room = RoomState::new("r1");
        assert!(room.submit_suggestion("fay", "a.py", "x=3").is_empty());
    }

    #[test]
    fn snapshot_reflects_current_state() {
        let mut room = RoomState::new("r1");
        room.request_turn("eve");
        room.create_file("a.py", "x=1").unwrap();
        room.edit_file("eve", "a.py", "x=2").unwrap();

        match room.snapshot() {
            ServerEnvelope::Ready { editor, files } => {
                assert_eq!(editor.as_deref(), Some("eve"));
                assert_eq!(files.get("a.py").map(String::as_str), Some("x=2"));
            },
            other => panic!("expected ready snapshot, got {other:?}"),
        }
    }
}
