//! WebRTC signaling server.
//!
//! A stateful relay: owns rooms and their participant sets, admits WebSocket
//! connections into rooms, and forwards offer/answer/ICE/chat messages
//! between members. No media ever touches this process; once two peers have
//! negotiated, their traffic flows directly between them.

mod config;
mod error;
mod handler;
mod http;
mod room;
mod runner;
mod signal;
mod state;

pub use config::ServerConfig;
pub use error::RelayError;
pub use runner::{BoundServer, SignalingServer};
