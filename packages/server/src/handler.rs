//! WebSocket connection handling and message relay.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use parley_shared::{
    protocol::{ParticipantInfo, SignalMessage},
    time::now_millis,
};

use crate::{
    error::RelayError,
    room::{Participant, Room},
    state::{AppState, ConnectQuery, OutboundFrame, OutboundSender},
};

/// Close code sent when the handshake lacks required parameters.
const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code sent to a session evicted by a rejoin under the same id.
const CLOSE_NORMAL: u16 = 1000;

/// Encode a signaling message for the wire.
///
/// Serialization of our own envelope cannot fail; the types contain no
/// map keys or values serde_json would reject.
fn encode(msg: &SignalMessage) -> String {
    serde_json::to_string(msg).expect("signal messages always serialize")
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let room_id = query.room_id.unwrap_or_default();
        let user_id = query.user_id.unwrap_or_default();
        if room_id.is_empty() || user_id.is_empty() {
            tracing::warn!("connection rejected: missing roomId or userId");
            reject_socket(socket).await;
            return;
        }
        let user_name = match query.user_name {
            Some(name) if !name.is_empty() => name,
            _ => "Anonymous".to_string(),
        };
        handle_socket(socket, state, room_id, user_id, user_name).await;
    })
}

/// Refuse an admitted socket with a policy-violation close code. No room or
/// participant state has been created at this point.
async fn reject_socket(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: "Missing roomId or userId".into(),
        })))
        .await;
}

pub async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    room_id: String,
    user_id: String,
    user_name: String,
) {
    let conn_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let now = now_millis();

    // Join protocol: lazy room creation, eviction of a stale same-id
    // session, presence broadcast, then the private room-state snapshot and
    // connected ack. The snapshot and ack go through our own outbound
    // channel so this connection sees a single ordered stream.
    {
        let mut rooms = state.rooms.lock().await;
        let room = rooms.entry(room_id.clone()).or_insert_with(|| {
            tracing::info!(room = %room_id, "room created");
            Room::new(room_id.clone(), now)
        });

        if let Some(stale) = room.evict(&user_id) {
            let _ = stale.sender.send(OutboundFrame::Close {
                code: CLOSE_NORMAL,
                reason: "Replaced by a newer session".to_string(),
            });
            let left = encode(&SignalMessage::UserLeft {
                user_id: user_id.clone(),
                timestamp: now,
            });
            broadcast_and_cascade(room, &left, None, now);
            tracing::info!(room = %room_id, user = %user_id, "evicted stale session on rejoin");
        }

        room.insert(
            user_id.clone(),
            Participant::new(conn_id, user_name.clone(), now, tx.clone()),
        );

        let joined = encode(&SignalMessage::UserJoined {
            user_id: user_id.clone(),
            user_name: user_name.clone(),
            timestamp: now,
        });
        broadcast_and_cascade(room, &joined, Some(&user_id), now);

        let participants = room
            .members_except(&user_id)
            .into_iter()
            .map(|(user_id, user_name)| ParticipantInfo { user_id, user_name })
            .collect();
        let _ = tx.send(OutboundFrame::Text(encode(&SignalMessage::RoomState {
            participants,
            timestamp: now,
        })));
        let _ = tx.send(OutboundFrame::Text(encode(&SignalMessage::Connected {
            room_id: room_id.clone(),
            user_id: user_id.clone(),
            timestamp: now,
        })));

        tracing::info!(
            room = %room_id,
            user = %user_id,
            name = %user_name,
            total = room.len(),
            "participant joined"
        );
    }

    let (mut sender, mut receiver) = socket.split();

    // Pump the outbound channel into the socket. Everything this connection
    // is sent, including its eviction close, flows through here.
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let result = match frame {
                OutboundFrame::Text(text) => sender.send(Message::Text(text.into())).await,
                OutboundFrame::Ping => sender.send(Message::Ping(Default::default())).await,
                OutboundFrame::Close { code, reason } => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    // Liveness probe: detect half-open sockets via the outbound pump. A
    // failed write surfaces in the pump and tears the connection down.
    let ping_tx = tx.clone();
    let ping_interval = state.config.ping_interval;
    let ping_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(ping_interval);
        interval.tick().await; // the first tick completes immediately
        loop {
            interval.tick().await;
            if ping_tx.send(OutboundFrame::Ping).is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_room_id = room_id.clone();
    let recv_user_id = user_id.clone();
    let recv_user_name = user_name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(user = %recv_user_id, "websocket error: {e}");
                    break;
                }
            };

            match msg {
                Message::Text(text) => {
                    dispatch_message(
                        &recv_state,
                        &recv_room_id,
                        &recv_user_id,
                        &recv_user_name,
                        &tx,
                        text.as_str(),
                    )
                    .await;
                }
                Message::Close(_) => {
                    tracing::info!(user = %recv_user_id, "client requested close");
                    break;
                }
                // Pong answers our liveness ping; Ping is answered by axum.
                _ => {}
            }
        }
    });

    // If either side of the connection finishes, tear down the other.
    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    };
    ping_task.abort();

    // Departure: remove our entry (unless a rejoin already replaced it),
    // notify the remaining members, and start the empty-room countdown.
    let now = now_millis();
    let mut became_empty = false;
    {
        let mut rooms = state.rooms.lock().await;
        if let Some(room) = rooms.get_mut(&room_id) {
            if room.remove_conn(&user_id, conn_id).is_some() {
                let left = encode(&SignalMessage::UserLeft {
                    user_id: user_id.clone(),
                    timestamp: now,
                });
                broadcast_and_cascade(room, &left, None, now);
                tracing::info!(
                    room = %room_id,
                    user = %user_id,
                    remaining = room.len(),
                    "participant left"
                );
            }
            if room.is_empty() && room.emptied_at.is_none() {
                room.emptied_at = Some(now);
                became_empty = true;
            }
        }
    }
    if became_empty {
        schedule_deferred_delete(state, room_id);
    }
}

/// Route one inbound text payload.
///
/// Targeted kinds are stamped with the sender and forwarded; delivery
/// failure is reported to the sender only. Chat is broadcast to the rest of
/// the room. Unknown kinds are logged and ignored so newer clients cannot
/// crash the relay; non-parseable payloads earn an error reply and the
/// connection stays open.
async fn dispatch_message(
    state: &Arc<AppState>,
    room_id: &str,
    user_id: &str,
    user_name: &str,
    reply: &OutboundSender,
    text: &str,
) {
    let now = now_millis();

    let mut msg = match serde_json::from_str::<SignalMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(user = %user_id, "failed to parse message: {e}");
            reply_error(reply, &RelayError::MalformedMessage(e), now);
            return;
        }
    };

    if let Some(target) = msg.target_user_id().map(str::to_string) {
        msg.stamp_sender(user_id, user_name, now);
        let delivered = {
            let mut rooms = state.rooms.lock().await;
            match rooms.get_mut(room_id) {
                Some(room) => room.forward(&encode(&msg), &target),
                None => false,
            }
        };
        if !delivered {
            tracing::warn!(
                room = %room_id,
                from = %user_id,
                to = %target,
                kind = msg.kind_str(),
                "relay target unreachable"
            );
            reply_error(reply, &RelayError::Delivery(target), now);
        }
        return;
    }

    match msg {
        SignalMessage::Chat { .. } => {
            msg.stamp_sender(user_id, user_name, now);
            let mut rooms = state.rooms.lock().await;
            if let Some(room) = rooms.get_mut(room_id) {
                broadcast_and_cascade(room, &encode(&msg), Some(user_id), now);
            }
        }
        SignalMessage::Ping { .. } => {
            let _ = reply.send(OutboundFrame::Text(encode(&SignalMessage::Pong {
                timestamp: now,
            })));
        }
        SignalMessage::Unknown => {
            tracing::warn!(user = %user_id, "ignoring unknown message kind");
        }
        other => {
            tracing::debug!(
                user = %user_id,
                kind = other.kind_str(),
                "ignoring unexpected kind from client"
            );
        }
    }
}

fn reply_error(reply: &OutboundSender, err: &RelayError, now: i64) {
    let frame = encode(&SignalMessage::Error {
        message: err.to_string(),
        timestamp: now,
    });
    let _ = reply.send(OutboundFrame::Text(frame));
}

/// Broadcast a frame and cascade departure notices for any member found
/// unreachable along the way, so a dead socket never lingers in the map.
fn broadcast_and_cascade(room: &mut Room, text: &str, exclude: Option<&str>, now: i64) {
    let mut dead = room.broadcast(text, exclude);
    while let Some(user_id) = dead.pop() {
        let left = encode(&SignalMessage::UserLeft {
            user_id,
            timestamp: now,
        });
        dead.extend(room.broadcast(&left, None));
    }
}

/// Deferred empty-room deletion: wait out the grace window, then re-verify
/// before deleting so a near-simultaneous rejoin wins the race. The room may
/// have been rejoined and emptied again while this timer slept, in which case
/// a younger timer owns it; only delete once the current emptiness has aged
/// out the full window.
pub(crate) fn schedule_deferred_delete(state: Arc<AppState>, room_id: String) {
    let grace = state.config.empty_room_grace;
    let grace_millis = grace.as_millis() as i64;
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        let mut rooms = state.rooms.lock().await;
        let now = now_millis();
        let aged_out = rooms.get(&room_id).is_some_and(|room| {
            room.is_empty() && room.emptied_at.is_some_and(|t| now - t >= grace_millis)
        });
        if aged_out {
            rooms.remove(&room_id);
            tracing::info!(room = %room_id, "deleted room after empty grace window");
        }
    });
}
