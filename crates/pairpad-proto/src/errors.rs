//! Protocol error types.

/// Convenience alias for protocol results.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors from envelope encoding and decoding.
///
/// A `Malformed` error means the inbound frame must be dropped (the
/// connection stays open); an `Encode` error indicates a server-side bug and
/// is logged rather than sent anywhere.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The inbound frame is not a valid envelope: bad JSON, missing required
    /// field, or unknown `type` tag.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// An outbound envelope failed to serialize.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}
