//! Broadcast fan-out: one committed event, many outbound queues.
//!
//! The fan-out serializes an envelope once and enqueues it on every
//! destination connection's bounded queue, non-blocking. Callers invoke it
//! while still holding the room lock, which is what turns per-room commit
//! order into per-recipient enqueue order; the ordering guarantee costs
//! nothing extra here because enqueueing never waits on the network.
//!
//! Queue-full policy: a recipient whose queue cannot accept the frame is
//! reported back as dead and subsequently dropped by the caller (forced
//! reconnect + `join` re-sync). One slow consumer never stalls the room.

use pairpad_proto::ServerEnvelope;

use crate::registry::{ConnectionId, ConnectionRegistry, DeliverError};

/// Which subset of a room's connections receives an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Every member, the original sender included (echo-to-all).
    All,
    /// Every member except the sending connection. Used for events the
    /// sender already knows first-hand, e.g. its own `user_joined`.
    AllExceptSender,
    /// Every connection currently bound to the given identity.
    Targeted(String),
}

/// Resolves destinations through the registry and enqueues serialized
/// frames. Stateless apart from the registry handle; cheap to clone.
#[derive(Debug, Clone)]
pub struct BroadcastFanout {
    registry: ConnectionRegistry,
}

impl BroadcastFanout {
    /// Create a fan-out over the given registry.
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Deliver one envelope to the subset of `room` selected by `mode`.
    ///
    /// `sender` is the connection the triggering frame arrived on; it is
    /// only consulted for [`DeliveryMode::AllExceptSender`].
    ///
    /// Returns the connections whose queues rejected the frame; the caller
    /// must disconnect them. An encoding failure is a server bug: it is
    /// logged and the event is not delivered to anyone (never partially).
    pub fn deliver(
        &self,
        room: &str,
        sender: ConnectionId,
        mode: &DeliveryMode,
        envelope: &ServerEnvelope,
    ) -> Vec<ConnectionId> {
        let frame = match envelope.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(room, error = %e, "dropping undeliverable envelope");
                return Vec::new();
            },
        };

        let mut dead = Vec::new();
        for (id, handle) in self.registry.members_of(room) {
            let selected = match mode {
                DeliveryMode::All => true,
                DeliveryMode::AllExceptSender => id != sender,
                DeliveryMode::Targeted(identity) => handle.identity() == identity,
            };
            if !selected {
                continue;
            }

            match handle.try_deliver(frame.clone()) {
                Ok(()) => {},
                Err(DeliverError::QueueFull) => {
                    tracing::warn!(room, connection = id, "outbound queue full, dropping member");
                    dead.push(id);
                },
                Err(DeliverError::Closed) => {
                    tracing::debug!(room, connection = id, "outbound queue already closed");
                    dead.push(id);
                },
            }
        }
        dead
    }
}
