//! Relay error taxonomy.

use thiserror::Error;

/// Errors arising while handling one inbound signaling message.
///
/// Every variant is converted into a typed `error` message back to the
/// originating sender; none of them close the connection or affect other
/// room members.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The relay target is not in the room or its socket is not writable.
    #[error("Failed to deliver message to {0}")]
    Delivery(String),

    /// The payload failed to parse as a signaling envelope.
    #[error("Invalid message format")]
    MalformedMessage(#[source] serde_json::Error),
}
