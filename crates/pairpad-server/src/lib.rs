//! Collaborative editing room server.
//!
//! Coordinates rooms of members editing a shared set of files under a
//! single-writer lease: at most one member (the editor) may commit edits at
//! a time, everyone else follows along live and negotiates for the lease
//! with turn requests. Committed changes fan out to every member in the
//! order the room accepted them.
//!
//! # Architecture
//!
//! The protocol core is sans-IO. [`RoomState`] holds one room's files and
//! lease and returns [`RoomAction`]s describing what to deliver and persist;
//! [`ProtocolRouter`] decodes inbound frames, applies session-identity
//! authority, and maps failures to the drop-or-notice policy. Neither
//! touches a socket, which keeps the whole protocol testable without a
//! runtime.
//!
//! Around the core sit the runtime pieces: [`ConnectionRegistry`] (who is
//! reachable on which bounded queue), [`BroadcastFanout`] (action delivery
//! with dead-connection reporting), [`RoomDirectory`] (per-room locks and
//! eviction), and [`Server`] (the axum WebSocket transport).

mod config;
mod directory;
mod error;
mod fanout;
mod persist;
mod registry;
mod room;
mod router;
mod transport;

pub use config::ServerConfig;
pub use directory::RoomDirectory;
pub use error::ServerError;
pub use fanout::{BroadcastFanout, DeliveryMode};
pub use persist::{MemoryPersistence, Persistence, PersistenceError};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, DeliverError};
pub use room::{FileEntry, RoomAction, RoomError, RoomState};
pub use router::{ProtocolRouter, Routed};
pub use transport::Server;
