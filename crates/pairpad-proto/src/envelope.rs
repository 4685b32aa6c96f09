//! Envelope sum types for both protocol directions.
//!
//! Field sets follow the room protocol table: every variant carries exactly
//! the required fields for its `type`. Server-side `code` and `file_create`
//! envelopes additionally carry the file `version` so the monotonicity of
//! accepted writes is observable on the wire; clients that predate the field
//! simply ignore it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Frames sent by clients.
///
/// The first frame on a fresh connection must be `Join`; everything else is
/// only valid once the member is registered in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Open-room handshake; also accepted later as an idempotent re-sync.
    Join {
        /// Display name the connection wants to be known as.
        identity: String,
    },

    /// Create a new file. Not lease-gated: any member may bootstrap a file.
    FileCreate {
        /// Room-unique file path.
        path: String,
        /// Initial full content.
        content: String,
    },

    /// Replace the full content of an existing file. Editor only.
    Code {
        /// Path of the file to edit.
        path: String,
        /// New full content (not a diff).
        content: String,
    },

    /// Ask for the edit lease, or take it immediately if the room is vacant.
    RequestTurn {
        /// Requester identity. The server trusts the session identity and
        /// only logs a mismatch.
        identity: String,
    },

    /// Editor grants the lease to `target`.
    ApproveTurn {
        /// Identity receiving the lease.
        target: String,
    },

    /// Editor rejects a pending request from `target`.
    DenyTurn {
        /// Identity whose request is removed.
        target: String,
    },

    /// Propose an edit to the current editor. Never stored, never gated.
    Suggestion {
        /// Who is proposing.
        author: String,
        /// File the proposal applies to.
        path: String,
        /// Proposed full content.
        content: String,
    },

    /// Free-form chat line, broadcast verbatim to the room.
    Chat {
        /// Speaker identity.
        identity: String,
        /// Message text.
        text: String,
    },
}

/// Frames sent by the server.
///
/// None of these are replayed to late joiners; a new member's view is built
/// entirely from its `Ready` snapshot plus whatever it observes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Initial snapshot delivered to a newly joined member.
    Ready {
        /// Current lease holder, `null` when the room is vacant.
        editor: Option<String>,
        /// Full path → content map at join time.
        files: BTreeMap<String, String>,
    },

    /// A file was created; sent to all members including the creator.
    FileCreate {
        /// Room-unique file path.
        path: String,
        /// Initial content.
        content: String,
        /// Always 1 for a fresh file.
        version: u64,
    },

    /// An accepted edit; sent to all members including the editor
    /// (echo-to-all, so every replica converges through server events).
    Code {
        /// Edited path.
        path: String,
        /// New full content.
        content: String,
        /// Post-edit version counter for this path.
        version: u64,
    },

    /// Private notice to the current editor that `identity` wants the lease.
    RequestTurn {
        /// The waiting requester.
        identity: String,
    },

    /// Lease change, broadcast to all members.
    TurnUpdate {
        /// New holder, `null` when the lease became vacant.
        editor: Option<String>,
    },

    /// Private notice to a rejected requester.
    DenyTurn {
        /// The rejected identity.
        target: String,
    },

    /// Live suggestion, delivered to the current editor only.
    Suggestion {
        /// Who proposed it.
        author: String,
        /// File the proposal applies to.
        path: String,
        /// Proposed full content.
        content: String,
    },

    /// Chat line, broadcast to all members.
    Chat {
        /// Speaker identity.
        identity: String,
        /// Message text.
        text: String,
    },

    /// A member finished joining the room.
    UserJoined {
        /// The new member's identity.
        identity: String,
    },

    /// A member's connection went away.
    UserLeft {
        /// The departed identity.
        identity: String,
    },

    /// Optional private notice for a dropped frame (validation failures).
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ClientEnvelope {
    /// Decode one inbound text frame.
    ///
    /// Unknown `type` tags and missing required fields fail here; extra
    /// fields inside a known variant are tolerated.
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(ProtocolError::Malformed)
    }
}

impl ServerEnvelope {
    /// Encode this envelope as a JSON text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_join() {
        let env = ClientEnvelope::decode(r#"{"type":"join","identity":"alice"}"#).unwrap();
        assert_eq!(env, ClientEnvelope::Join { identity: "alice".into() });
    }

    #[test]
    fn decode_code_edit() {
        let env =
            ClientEnvelope::decode(r#"{"type":"code","path":"a.py","content":"x=1"}"#).unwrap();
        assert_eq!(env, ClientEnvelope::Code { path: "a.py".into(), content: "x=1".into() });
    }

    #[test]
    fn decode_tolerates_extra_fields() {
        let env = ClientEnvelope::decode(
            r#"{"type":"request_turn","identity":"bob","client_ts":12345,"hint":"urgent"}"#,
        )
        .unwrap();
        assert_eq!(env, ClientEnvelope::RequestTurn { identity: "bob".into() });
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let err = ClientEnvelope::decode(r#"{"type":"release_lock","identity":"bob"}"#);
        assert!(matches!(err, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn decode_rejects_missing_required_field() {
        let err = ClientEnvelope::decode(r#"{"type":"code","path":"a.py"}"#);
        assert!(matches!(err, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn decode_rejects_non_object() {
        assert!(ClientEnvelope::decode("[1,2,3]").is_err());
        assert!(ClientEnvelope::decode("not json at all").is_err());
    }

    #[test]
    fn ready_encodes_null_editor_and_file_map() {
        let mut files = BTreeMap::new();
        files.insert("main.py".to_string(), String::new());
        let raw = ServerEnvelope::Ready { editor: None, files }.encode().unwrap();

        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "ready");
        assert!(value["editor"].is_null());
        assert_eq!(value["files"]["main.py"], "");
    }

    #[test]
    fn turn_update_round_trips_holder() {
        let raw = ServerEnvelope::TurnUpdate { editor: Some("alice".into()) }.encode().unwrap();
        let back: ServerEnvelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, ServerEnvelope::TurnUpdate { editor: Some("alice".into()) });
    }

    #[test]
    fn suggestion_tag_matches_both_directions() {
        // Client and server suggestion frames share the same wire tag, so a
        // relayed suggestion stays recognizable to other protocol peers.
        let client = r#"{"type":"suggestion","author":"fay","path":"a.py","content":"x=2"}"#;
        assert!(ClientEnvelope::decode(client).is_ok());

        let server = ServerEnvelope::Suggestion {
            author: "fay".into(),
            path: "a.py".into(),
            content: "x=2".into(),
        }
        .encode()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&server).unwrap();
        assert_eq!(value["type"], "suggestion");
    }
}
