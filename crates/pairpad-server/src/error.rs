//! Server error types.

use std::fmt;

/// Errors that can occur in the server runtime.
///
/// Room-level failures never surface here: a misbehaving client is handled
/// inside the router (drop / private notice) and can only affect its own
/// session. These variants cover the process-level concerns.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, nonsensical limits).
    ///
    /// Fatal at startup. Fix configuration and restart.
    Config(String),

    /// Transport/network error (bind failure, accept failure, I/O error).
    ///
    /// May be transient (network issues) or fatal (address in use).
    Transport(String),

    /// Protocol error that escaped the per-connection handling.
    ///
    /// Indicates a bug in frame handling rather than client misbehavior.
    Protocol(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<pairpad_proto::ProtocolError> for ServerError {
    fn from(err: pairpad_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}
