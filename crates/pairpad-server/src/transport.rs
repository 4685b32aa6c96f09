//! WebSocket transport runtime.
//!
//! This is the thin I/O wrapper around the sans-IO core: one axum WebSocket
//! route, one reader loop per connection, one writer task per connection
//! draining the bounded outbound queue. The reader shapes bytes into frames
//! and everything protocol-shaped happens under the room lock via
//! [`ProtocolRouter`]; the writer only moves already-serialized frames to the
//! socket.
//!
//! Connection lifecycle:
//!
//! 1. upgrade on `/ws/{room}`, handshake: the first text frame must be a
//!    `join` envelope, anything else closes the socket
//! 2. register in [`ConnectionRegistry`], send the `ready` snapshot, announce
//!    `user_joined` to the rest of the room
//! 3. loop: inbound frame → route → fan out resulting actions
//! 4. on close/error (or a full outbound queue): deregister, run the
//!    identity-level disconnect if no other connection shares the name,
//!    announce `user_left`, start the eviction countdown if the room emptied
//!
//! The registry owns the only sender of each outbound queue, so removing a
//! connection closes its writer task, which closes the socket.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{
    Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use pairpad_proto::{ClientEnvelope, ServerEnvelope};
use tokio::sync::mpsc;

use crate::{
    config::ServerConfig,
    directory::RoomDirectory,
    error::ServerError,
    fanout::{BroadcastFanout, DeliveryMode},
    persist::{MemoryPersistence, Persistence},
    registry::{ConnectionHandle, ConnectionId, ConnectionRegistry},
    room::RoomAction,
    router::ProtocolRouter,
};

/// Shared runtime state handed to every connection task.
#[derive(Debug)]
struct AppState<P: Persistence> {
    config: ServerConfig,
    registry: ConnectionRegistry,
    directory: RoomDirectory,
    router: ProtocolRouter,
    fanout: BroadcastFanout,
    persistence: P,
    live_connections: Arc<AtomicUsize>,
}

impl<P: Persistence> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            registry: self.registry.clone(),
            directory: self.directory.clone(),
            router: self.router.clone(),
            fanout: self.fanout.clone(),
            persistence: self.persistence.clone(),
            live_connections: Arc::clone(&self.live_connections),
        }
    }
}

/// Production server: axum WebSocket transport over the room core.
pub struct Server<P: Persistence = MemoryPersistence> {
    state: AppState<P>,
    listener: tokio::net::TcpListener,
}

impl Server<MemoryPersistence> {
    /// Bind with the in-memory persistence collaborator.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        Self::bind_with(config, MemoryPersistence::new()).await
    }
}

impl<P: Persistence> Server<P> {
    /// Bind with an explicit persistence collaborator.
    pub async fn bind_with(config: ServerConfig, persistence: P) -> Result<Self, ServerError> {
        if config.queue_capacity == 0 {
            return Err(ServerError::Config("queue capacity must be at least 1".to_string()));
        }

        let registry = ConnectionRegistry::new();
        let state = AppState {
            directory: RoomDirectory::new(config.evict_grace),
            router: ProtocolRouter::new(registry.clone()),
            fanout: BroadcastFanout::new(registry.clone()),
            registry,
            persistence,
            live_connections: Arc::new(AtomicUsize::new(0)),
            config: config.clone(),
        };

        let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
        Ok(Self { state, listener })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the server until shutdown or a fatal transport error.
    pub async fn run(self) -> Result<(), ServerError> {
        let app = Router::new()
            .route("/ws/{room}", get(ws_upgrade::<P>))
            .with_state(self.state);

        axum::serve(self.listener, app).await?;
        Ok(())
    }
}

/// Upgrade handler for `/ws/{room}`.
async fn ws_upgrade<P: Persistence>(
    Path(room): Path<String>,
    State(state): State<AppState<P>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, room, state))
}

/// Drive one WebSocket connection from handshake to cleanup.
async fn handle_socket<P: Persistence>(socket: WebSocket, room_key: String, state: AppState<P>) {
    if state.live_connections.fetch_add(1, Ordering::SeqCst) >= state.config.max_connections {
        state.live_connections.fetch_sub(1, Ordering::SeqCst);
        tracing::warn!(room = %room_key, "rejecting connection, server at capacity");
        let mut socket = socket;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let (sink, mut stream) = socket.split();

    let Some(identity) = handshake(&mut stream).await else {
        tracing::debug!(room = %room_key, "handshake failed, closing");
        close_sink(sink).await;
        state.live_connections.fetch_sub(1, Ordering::SeqCst);
        return;
    };

    let connection = state.registry.next_connection_id();
    let (outbound_tx, outbound_rx) = mpsc::channel(state.config.queue_capacity);
    tokio::spawn(write_outbound(sink, outbound_rx));

    tracing::info!(room = %room_key, connection, identity = %identity, "member joined");
    register_member(&state, &room_key, connection, &identity, outbound_tx).await;

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(raw)) => {
                // A forced drop (full queue) may have already deregistered us.
                if state.registry.handle(&room_key, connection).is_none() {
                    break;
                }
                handle_frame(&state, &room_key, connection, &identity, raw.as_str()).await;
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                tracing::debug!(room = %room_key, connection, "ignoring binary frame");
            },
            Ok(_) => {}, // ping/pong handled by axum
            Err(e) => {
                tracing::debug!(room = %room_key, connection, error = %e, "socket error");
                break;
            },
        }
    }

    cleanup_connections(&state, &room_key, vec![connection]).await;
    state.live_connections.fetch_sub(1, Ordering::SeqCst);
    tracing::info!(room = %room_key, connection, identity = %identity, "connection closed");
}

/// Outcome of inspecting one frame while waiting for the opening `join`.
enum HandshakeStep {
    /// A valid `join` arrived; the connection is identified.
    Joined(String),
    /// Anything else that counts as a first frame closes the connection.
    Reject,
    /// Control frame; keep waiting.
    Skip,
}

fn handshake_step(message: &Message) -> HandshakeStep {
    match message {
        Message::Text(raw) => match ClientEnvelope::decode(raw.as_str()) {
            Ok(ClientEnvelope::Join { identity }) if !identity.is_empty() => {
                HandshakeStep::Joined(identity)
            },
            Ok(_) => {
                tracing::debug!("first frame was not a join");
                HandshakeStep::Reject
            },
            Err(e) => {
                tracing::debug!(error = %e, "malformed handshake frame");
                HandshakeStep::Reject
            },
        },
        Message::Binary(_) => {
            tracing::debug!("binary first frame");
            HandshakeStep::Reject
        },
        Message::Close(_) => HandshakeStep::Reject,
        Message::Ping(_) | Message::Pong(_) => HandshakeStep::Skip,
    }
}

/// Wait for the opening `join` frame. `None` means close without joining.
async fn handshake(stream: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(message) = stream.next().await {
        match message {
            Ok(message) => match handshake_step(&message) {
                HandshakeStep::Joined(identity) => return Some(identity),
                HandshakeStep::Reject => return None,
                HandshakeStep::Skip => {},
            },
            Err(_) => return None,
        }
    }
    None
}

/// Writer task: drain the bounded queue into the socket. Ends when the
/// registry drops the last sender (deregistration) or the peer goes away.
async fn write_outbound(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<String>) {
    while let Some(frame) = rx.recv().await {
        if sink.send(Message::Text(frame.into())).await.is_err() {
            break;
        }
    }
    close_sink(sink).await;
}

async fn close_sink(mut sink: SplitSink<WebSocket, Message>) {
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

/// Register a new member, send its snapshot, and announce it - all under the
/// room lock so the `ready`/`user_joined` pair is ordered against every
/// concurrent operation on this room.
async fn register_member<P: Persistence>(
    state: &AppState<P>,
    room_key: &str,
    connection: ConnectionId,
    identity: &str,
    outbound_tx: mpsc::Sender<String>,
) {
    let dead = loop {
        let room_arc = state.directory.open(room_key);
        let room = room_arc.lock().await;
        state
            .registry
            .add(room_key, connection, ConnectionHandle::new(identity, outbound_tx.clone()));

        // The eviction task may have removed this entry between `open` and
        // the registry add. A stale room would leave the snapshot and every
        // later frame on different state, so deregister and reopen.
        if !state.directory.resolves_to(room_key, &room_arc) {
            let _ = state.registry.remove(room_key, connection);
            continue;
        }

        let mut dead = deliver_private(state, room_key, connection, &room.snapshot());
        dead.extend(state.fanout.deliver(
            room_key,
            connection,
            &DeliveryMode::AllExceptSender,
            &ServerEnvelope::UserJoined { identity: identity.to_string() },
        ));
        break dead;
    };
    // `outbound_tx` drops on return, leaving the registry's clone as the
    // queue's only sender.
    cleanup_connections(state, room_key, dead).await;
}

/// Route one inbound frame and execute the resulting actions.
async fn handle_frame<P: Persistence>(
    state: &AppState<P>,
    room_key: &str,
    connection: ConnectionId,
    identity: &str,
    raw: &str,
) {
    let room_arc = state.directory.open(room_key);
    let (dead, snapshots) = {
        let mut room = room_arc.lock().await;
        let routed = state.router.route(&mut room, connection, identity, raw);

        let mut dead = match routed.reply {
            Some(reply) => deliver_private(state, room_key, connection, &reply),
            None => Vec::new(),
        };

        let mut snapshots = Vec::new();
        for action in routed.actions {
            match action {
                RoomAction::Deliver { mode, envelope } => {
                    dead.extend(state.fanout.deliver(room_key, connection, &mode, &envelope));
                },
                RoomAction::Persist { files } => snapshots.push(files),
            }
        }
        (dead, snapshots)
    };

    // Persistence is best-effort and runs off the room lock.
    for files in snapshots {
        spawn_persist(state.persistence.clone(), room_key.to_string(), files);
    }

    cleanup_connections(state, room_key, dead).await;
}

/// Enqueue a private envelope on one connection's own queue.
///
/// Returns the connection as dead if its queue is full or gone.
fn deliver_private<P: Persistence>(
    state: &AppState<P>,
    room_key: &str,
    connection: ConnectionId,
    envelope: &ServerEnvelope,
) -> Vec<ConnectionId> {
    let Some(handle) = state.registry.handle(room_key, connection) else {
        return Vec::new();
    };
    let frame = match envelope.encode() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(room = %room_key, connection, error = %e, "failed to encode reply");
            return Vec::new();
        },
    };
    match handle.try_deliver(frame) {
        Ok(()) => Vec::new(),
        Err(e) => {
            tracing::warn!(room = %room_key, connection, ?e, "private delivery failed");
            vec![connection]
        },
    }
}

fn spawn_persist<P: Persistence>(
    persistence: P,
    room_key: String,
    files: BTreeMap<String, String>,
) {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = persistence.persist(&room_key, &files) {
            tracing::warn!(room = %room_key, error = %e, "persistence failed (ignored)");
        }
    });
}

/// Deregister connections and run the protocol-level disconnect semantics.
///
/// Iterative worklist: announcing a departure can itself overflow another
/// member's queue, which adds that member to the list. When the room's
/// member set empties, the eviction countdown starts.
async fn cleanup_connections<P: Persistence>(
    state: &AppState<P>,
    room_key: &str,
    mut pending: Vec<ConnectionId>,
) {
    let mut any_removed = false;

    while let Some(connection) = pending.pop() {
        // Idempotent: the queue-full path and the socket-close path may both
        // get here for the same connection.
        let Some(handle) = state.registry.remove(room_key, connection) else {
            continue;
        };
        any_removed = true;
        let identity = handle.identity().to_string();
        drop(handle); // last sender for this queue; the writer task ends

        let identity_gone = !state.registry.identity_present(room_key, &identity);
        let room_arc = state.directory.open(room_key);
        let dead = {
            let mut room = room_arc.lock().await;
            let mut actions = Vec::new();
            if identity_gone {
                actions.extend(room.disconnect(&identity));
            }
            actions.push(RoomAction::Deliver {
                mode: DeliveryMode::All,
                envelope: ServerEnvelope::UserLeft { identity: identity.clone() },
            });

            let mut dead = Vec::new();
            for action in actions {
                if let RoomAction::Deliver { mode, envelope } = action {
                    dead.extend(state.fanout.deliver(room_key, connection, &mode, &envelope));
                }
            }
            dead
        };
        pending.extend(dead);
    }

    if any_removed && state.registry.member_count(room_key) == 0 {
        state.directory.schedule_eviction(room_key, state.registry.clone());
    }
}
