//! Protocol router: raw frame in, room operations out.
//!
//! The router decodes an inbound text frame into a [`ClientEnvelope`],
//! shapes it into the matching [`RoomState`] operation, and translates
//! failures into the drop policy:
//!
//! - validation failure (bad JSON, unknown tag, missing field): frame
//!   dropped, connection stays open, the offending connection alone may get
//!   an `error` envelope back
//! - authorization failure (lease-gated op from a non-editor): silent no-op
//! - not-found (unknown path, hand-off to an absent identity): silent no-op
//!
//! Authority is re-checked inside [`RoomState`] (defense in depth); the
//! router contributes only what the state machine cannot know - the live
//! connection set, used to resolve hand-off targets.

use pairpad_proto::{ClientEnvelope, ServerEnvelope};

use crate::{
    registry::{ConnectionId, ConnectionRegistry},
    room::{RoomAction, RoomState},
};

/// What a routed frame produced.
#[derive(Debug, Default)]
pub struct Routed {
    /// Room actions, in commit order, for fan-out and persistence.
    pub actions: Vec<RoomAction>,
    /// Private reply for the sending connection only (snapshot re-sync or
    /// validation notice). Delivered outside the fan-out path.
    pub reply: Option<ServerEnvelope>,
}

impl Routed {
    fn actions(actions: Vec<RoomAction>) -> Self {
        Self { actions, reply: None }
    }

    fn reply(envelope: ServerEnvelope) -> Self {
        Self { actions: Vec::new(), reply: Some(envelope) }
    }

    fn dropped() -> Self {
        Self::default()
    }
}

/// Decodes, validates, and dispatches inbound frames for one room at a time.
#[derive(Debug, Clone)]
pub struct ProtocolRouter {
    registry: ConnectionRegistry,
}

impl ProtocolRouter {
    /// Create a router over the given registry.
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Route one raw inbound frame.
    ///
    /// `identity` is the name the connection joined under; payload identity
    /// fields are advisory and a mismatch is logged, never trusted for
    /// lease-gated operations. The caller holds the room lock for the whole
    /// call, so the returned actions are in commit order.
    pub fn route(
        &self,
        room: &mut RoomState,
        connection: ConnectionId,
        identity: &str,
        raw: &str,
    ) -> Routed {
        let envelope = match ClientEnvelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(room = %room.key(), connection, error = %e, "dropping frame");
                return Routed::reply(ServerEnvelope::Error { message: e.to_string() });
            },
        };

        match envelope {
            ClientEnvelope::Join { identity: claimed } => {
                // The handshake already registered this connection; a later
                // join is an idempotent re-sync of the snapshot.
                if claimed != identity {
                    tracing::debug!(
                        room = %room.key(),
                        connection,
                        claimed,
                        "join identity differs from session identity"
                    );
                }
                Routed::reply(room.snapshot())
            },

            ClientEnvelope::FileCreate { path, content } => {
                match room.create_file(&path, &content) {
                    Ok(actions) => Routed::actions(actions),
                    Err(e) => {
                        tracing::debug!(room = %room.key(), connection, error = %e, "create rejected");
                        Routed::reply(ServerEnvelope::Error { message: e.to_string() })
                    },
                }
            },

            ClientEnvelope::Code { path, content } => {
                match room.edit_file(identity, &path, &content) {
                    Ok(actions) => Routed::actions(actions),
                    Err(e) => {
                        tracing::debug!(room = %room.key(), connection, error = %e, "edit ignored");
                        Routed::dropped()
                    },
                }
            },

            ClientEnvelope::RequestTurn { identity: claimed } => {
                if claimed != identity {
                    tracing::debug!(
                        room = %room.key(),
                        connection,
                        claimed,
                        "request_turn identity differs from session identity"
                    );
                }
                Routed::actions(room.request_turn(identity))
            },

            ClientEnvelope::ApproveTurn { target } => {
                if !self.registry.identity_present(room.key(), &target) {
                    tracing::debug!(room = %room.key(), target, "hand-off target not present");
                    return Routed::dropped();
                }
                match room.approve_turn(identity, &target) {
                    Ok(actions) => Routed::actions(actions),
                    Err(e) => {
                        tracing::debug!(room = %room.key(), connection, error = %e, "approve ignored");
                        Routed::dropped()
                    },
                }
            },

            ClientEnvelope::DenyTurn { target } => match room.deny_turn(identity, &target) {
                Ok(actions) => Routed::actions(actions),
                Err(e) => {
                    tracing::debug!(room = %room.key(), connection, error = %e, "deny ignored");
                    Routed::dropped()
                },
            },

            ClientEnvelope::Suggestion { author, path, content } => {
                Routed::actions(room.submit_suggestion(&author, &path, &content))
            },

            ClientEnvelope::Chat { identity: claimed, text } => {
                if claimed != identity {
                    tracing::debug!(
                        room = %room.key(),
                        connection,
                        claimed,
                        "chat identity differs from session identity"
                    );
                }
                Routed::actions(room.chat(identity, &text))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::{fanout::DeliveryMode, registry::ConnectionHandle};

    fn setup() -> (ProtocolRouter, ConnectionRegistry, RoomState) {
        let registry = ConnectionRegistry::new();
        let router = ProtocolRouter::new(registry.clone());
        (router, registry, RoomState::new("r1"))
    }

    fn join(registry: &ConnectionRegistry, id: u64, identity: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(8);
        registry.add("r1", id, ConnectionHandle::new(identity, tx));
        rx
    }

    #[test]
    fn malformed_frame_yields_private_error_only() {
        let (router, _registry, mut room) = setup();

        let routed = router.route(&mut room, 1, "alice", "{not json");

        assert!(routed.actions.is_empty());
        assert!(matches!(routed.reply, Some(ServerEnvelope::Error { .. })));
    }

    #[test]
    fn unknown_type_is_a_validation_error() {
        let (router, _registry, mut room) = setup();

        let routed = router.route(&mut room, 1, "alice", r#"{"type":"self_destruct"}"#);

        assert!(routed.actions.is_empty());
        assert!(matches!(routed.reply, Some(ServerEnvelope::Error { .. })));
    }

    #[test]
    fn edit_from_non_editor_is_silent() {
        let (router, _registry, mut room) = setup();
        room.request_turn("eve");
        room.create_file("a.py", "x=1").unwrap();

        let routed = router.route(
            &mut room,
            1,
            "mallory",
            r#"{"type":"code","path":"a.py","content":"x=666"}"#,
        );

        assert!(routed.actions.is_empty());
        assert!(routed.reply.is_none());
        assert_eq!(room.file_content("a.py"), Some("x=1"));
    }

    #[test]
    fn approve_of_absent_identity_is_a_noop() {
        let (router, registry, mut room) = setup();
        let _rx = join(&registry, 1, "eve");
        room.request_turn("eve");

        let routed = router.route(&mut room, 1, "eve", r#"{"type":"approve_turn","target":"ghost"}"#);

        assert!(routed.actions.is_empty());
        assert_eq!(room.editor(), Some("eve"));
    }

    #[test]
    fn approve_of_present_member_transfers() {
        let (router, registry, mut room) = setup();
        let _rx_e = join(&registry, 1, "eve");
        let _rx_b = join(&registry, 2, "bob");
        room.request_turn("eve");

        let routed = router.route(&mut room, 1, "eve", r#"{"type":"approve_turn","target":"bob"}"#);

        assert_eq!(room.editor(), Some("bob"));
        assert!(!routed.actions.is_empty());
    }

    #[test]
    fn repeat_join_replies_with_fresh_snapshot() {
        let (router, _registry, mut room) = setup();
        room.create_file("a.py", "x=1").unwrap();

        let routed = router.route(&mut room, 1, "alice", r#"{"type":"join","identity":"alice"}"#);

        match routed.reply {
            Some(ServerEnvelope::Ready { files, .. }) => {
                assert_eq!(files.get("a.py").map(String::as_str), Some("x=1"));
            },
            other => panic!("expected ready reply, got {other:?}"),
        }
    }

    #[test]
    fn request_turn_uses_session_identity() {
        let (router, _registry, mut room) = setup();

        // Payload claims someone else; the session identity wins.
        let routed =
            router.route(&mut room, 1, "alice", r#"{"type":"request_turn","identity":"admin"}"#);

        assert_eq!(room.editor(), Some("alice"));
        assert!(!routed.actions.is_empty());
    }

    #[test]
    fn duplicate_create_gets_private_notice() {
        let (router, _registry, mut room) = setup();
        room.create_file("a.py", "x=1").unwrap();

        let routed = router.route(
            &mut room,
            1,
            "alice",
            r#"{"type":"file_create","path":"a.py","content":"y=2"}"#,
        );

        assert!(routed.actions.is_empty());
        assert!(matches!(routed.reply, Some(ServerEnvelope::Error { .. })));
        assert_eq!(room.file_content("a.py"), Some("x=1"));
    }

    #[test]
    fn chat_is_broadcast_to_all() {
        let (router, _registry, mut room) = setup();

        let routed =
            router.route(&mut room, 1, "alice", r#"{"type":"chat","identity":"alice","text":"hi"}"#);

        assert_eq!(routed.actions.len(), 1);
        assert!(matches!(
            &routed.actions[0],
            RoomAction::Deliver { mode: DeliveryMode::All, envelope: ServerEnvelope::Chat { .. } }
        ));
    }
}
