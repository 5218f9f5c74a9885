//! Shared server state and per-connection plumbing.

use std::collections::HashMap;

use serde::Deserialize;
use tokio::sync::{Mutex, mpsc};

use crate::{config::ServerConfig, room::Room};

/// Query parameters carried on the WebSocket connection handshake.
///
/// `room_id` and `user_id` are required for admission; `user_name` defaults
/// to "Anonymous". The fields are optional here so the server can accept the
/// upgrade and refuse with a proper policy-violation close code instead of a
/// bare HTTP rejection.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    pub room_id: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

/// One frame queued on a participant's outbound channel.
///
/// All traffic to a socket goes through its pump task, so eviction can close
/// a stale session by queueing a close frame rather than reaching into
/// another task's socket.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Text(String),
    Ping,
    Close { code: u16, reason: String },
}

/// Sender half of a participant's outbound channel.
pub type OutboundSender = mpsc::UnboundedSender<OutboundFrame>;

/// Shared application state: the room table and the config it runs under.
pub struct AppState {
    pub rooms: Mutex<HashMap<String, Room>>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            config,
        }
    }
}
