//! Error types for the client connection manager.

use std::time::Duration;

use thiserror::Error;

use parley_shared::protocol::MAX_CHAT_BODY_LEN;

/// Local media acquisition failed. Fatal to the call-setup attempt; the
/// manager never retries device access on its own.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("media capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("requested capture device not available: {0}")]
    NotAvailable(String),
}

/// The signaling transport could not be established or dropped.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("signaling connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("signaling transport closed")]
    Closed,
}

/// A single peer's negotiation failed. Isolated to that peer; other
/// connections and the local stream are unaffected.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("failed to create session description: {0}")]
    Description(String),

    #[error("failed to apply ICE candidate: {0}")]
    Candidate(String),

    #[error("peer connection is closed")]
    Closed,
}

/// Caller-visible errors from the connection manager.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("local media must be acquired before connecting to a room")]
    MediaNotInitialized,

    #[error("chat body must be between 1 and {MAX_CHAT_BODY_LEN} characters")]
    InvalidChatBody,

    #[error("not connected to a room")]
    NotConnected,
}
