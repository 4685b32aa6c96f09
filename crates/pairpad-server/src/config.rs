//! Server configuration.

use std::time::Duration;

/// Tunables for the server runtime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g. "0.0.0.0:8080").
    pub bind_address: String,
    /// Maximum concurrent connections across all rooms.
    pub max_connections: usize,
    /// Capacity of each connection's bounded outbound queue. A connection
    /// whose queue fills up is dropped (reconnect + re-sync), never buffered
    /// without bound.
    pub queue_capacity: usize,
    /// How long an empty room's state survives before eviction, to tolerate
    /// brief reconnects.
    pub evict_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            queue_capacity: 64,
            evict_grace: Duration::from_secs(30),
        }
    }
}
