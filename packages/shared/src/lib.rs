//! Shared contracts for the Parley signaling stack.
//!
//! This crate holds the pieces both the signaling server and the client
//! connection manager depend on: the typed wire-protocol envelope, timestamp
//! utilities with a clock abstraction, and tracing setup.

pub mod logger;
pub mod protocol;
pub mod time;
