//! Client connection manager for the Parley signaling stack.
//!
//! One [`manager::ConnectionManager`] represents one local participant's
//! view of a call: the local media stream, one negotiated connection per
//! remote participant, chat, and presence. The platform pieces it cannot
//! carry itself (capture devices, the real-time peer primitive) sit behind
//! traits so the manager runs the same against a browser bridge, a native
//! stack, or the in-process stubs used by tests and the demo binary.

pub mod cli;
pub mod error;
pub mod manager;
pub mod media;
pub mod rtc;
pub mod transport;
