//! Wire envelopes for the pairpad room protocol.
//!
//! Every message exchanged between a client and the server is a JSON object
//! with a `type` discriminator. This crate models the two directions as
//! closed sum types: [`ClientEnvelope`] for inbound frames and
//! [`ServerEnvelope`] for outbound frames. The router matches them
//! exhaustively, so an unknown `type` tag fails at decode time instead of
//! silently mis-dispatching.
//!
//! Decoding is deliberately lenient about *extra* fields (clients may send
//! more than the protocol requires) and strict about *missing required*
//! fields and unknown tags, which take the validation-error path.

mod envelope;
mod errors;

pub use envelope::{ClientEnvelope, ServerEnvelope};
pub use errors::{ProtocolError, Result};
