//! Plain HTTP surface: liveness and health.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};

use parley_shared::time::now_millis;

use crate::{room::Room, state::AppState};

/// Plain-text liveness response on the root path.
pub async fn root() -> &'static str {
    "WebRTC Signaling Server is running"
}

/// JSON status: room count, aggregate participant count, timestamp.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let rooms = state.rooms.lock().await;
    let total_participants: usize = rooms.values().map(Room::len).sum();
    Json(serde_json::json!({
        "status": "healthy",
        "rooms": rooms.len(),
        "totalParticipants": total_participants,
        "timestamp": now_millis(),
    }))
}

/// Empty 200 for OPTIONS probes; the CORS layer attaches the headers.
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}
