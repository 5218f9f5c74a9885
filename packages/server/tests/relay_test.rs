//! Integration tests for the signaling server over real WebSocket
//! connections.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::protocol::{Message, frame::CloseFrame},
};

use parley_server::{BoundServer, ServerConfig, SignalingServer};
use parley_shared::protocol::{
    ChatKind, ChatMessage, IceCandidate, SessionDescription, SignalMessage,
};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> BoundServer {
    start_server_with(test_config()).await
}

async fn start_server_with(config: ServerConfig) -> BoundServer {
    SignalingServer::new(config)
        .bind()
        .await
        .expect("failed to bind test server")
}

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..ServerConfig::default()
    }
}

async fn connect(server: &BoundServer, query: &str) -> Ws {
    let url = format!("{}?{}", server.ws_url(), query);
    let (ws, _response) = connect_async(&url).await.expect("websocket connect failed");
    ws
}

/// Join a room and consume the room-state + connected handshake.
async fn join(server: &BoundServer, room: &str, user: &str, name: &str) -> Ws {
    let mut ws = connect(server, &format!("roomId={room}&userId={user}&userName={name}")).await;

    let first = next_signal(&mut ws).await;
    assert!(
        matches!(first, SignalMessage::RoomState { .. }),
        "expected room-state first, got {first:?}"
    );
    let second = next_signal(&mut ws).await;
    match second {
        SignalMessage::Connected {
            room_id, user_id, ..
        } => {
            assert_eq!(room_id, room);
            assert_eq!(user_id, user);
        }
        other => panic!("expected connected ack, got {other:?}"),
    }

    ws
}

/// Next text frame within `window`, skipping control frames.
async fn recv_text(ws: &mut Ws, window: Duration) -> Option<String> {
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return None,
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => return Some(text.to_string()),
                Some(Ok(_)) => continue,
                _ => return None,
            },
        }
    }
}

async fn next_signal(ws: &mut Ws) -> SignalMessage {
    let text = recv_text(ws, Duration::from_secs(2))
        .await
        .expect("timed out waiting for a signaling message");
    serde_json::from_str(&text).expect("unparseable signaling message")
}

async fn assert_silent(ws: &mut Ws) {
    if let Some(text) = recv_text(ws, Duration::from_millis(300)).await {
        panic!("expected silence, got: {text}");
    }
}

async fn wait_close(ws: &mut Ws) -> Option<CloseFrame> {
    let deadline = tokio::time::sleep(Duration::from_secs(2));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => panic!("timed out waiting for close frame"),
            frame = ws.next() => match frame {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            },
        }
    }
}

async fn send_signal(ws: &mut Ws, msg: &SignalMessage) {
    let text = serde_json::to_string(msg).expect("serialize");
    ws.send(Message::Text(text.into())).await.expect("send");
}

async fn health(server: &BoundServer) -> serde_json::Value {
    reqwest::get(format!("{}/health", server.http_url()))
        .await
        .expect("health request failed")
        .json()
        .await
        .expect("health response was not JSON")
}

fn test_offer(target: &str) -> SignalMessage {
    SignalMessage::Offer {
        target_user_id: target.to_string(),
        offer: SessionDescription::offer("v=0\r\ns=test\r\n"),
        user_id: None,
        user_name: None,
        timestamp: None,
    }
}

fn test_candidate(target: &str) -> SignalMessage {
    SignalMessage::IceCandidate {
        target_user_id: target.to_string(),
        candidate: IceCandidate {
            candidate: "candidate:0 1 UDP 2122252543 192.0.2.1 54321 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        },
        user_id: None,
        user_name: None,
        timestamp: None,
    }
}

#[tokio::test]
async fn test_join_handshake_and_health_counts() {
    let server = start_server().await;

    let alice = join(&server, "r1", "alice", "Alice").await;
    let bob = join(&server, "r1", "bob", "Bob").await;
    let carol = join(&server, "r2", "carol", "Carol").await;

    let health = health(&server).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["rooms"], 2);
    assert_eq!(health["totalParticipants"], 3);

    // graceful shutdown drains open connections, so release them first
    drop(alice);
    drop(bob);
    drop(carol);
    server.shutdown().await;
}

#[tokio::test]
async fn test_join_broadcast_excludes_the_joiner() {
    let server = start_server().await;
    let mut alice = join(&server, "r1", "alice", "Alice").await;

    let mut bob = join(&server, "r1", "bob", "Bob").await;

    // alice hears about bob; bob's handshake already excluded his own notice
    match next_signal(&mut alice).await {
        SignalMessage::UserJoined {
            user_id, user_name, ..
        } => {
            assert_eq!(user_id, "bob");
            assert_eq!(user_name, "Bob");
        }
        other => panic!("expected user-joined, got {other:?}"),
    }
    assert_silent(&mut bob).await;
}

#[tokio::test]
async fn test_room_state_lists_existing_members_only() {
    let server = start_server().await;
    let _alice = join(&server, "r1", "alice", "Alice").await;

    let mut bob = connect(&server, "roomId=r1&userId=bob&userName=Bob").await;

    match next_signal(&mut bob).await {
        SignalMessage::RoomState { participants, .. } => {
            assert_eq!(participants.len(), 1);
            assert_eq!(participants[0].user_id, "alice");
            assert_eq!(participants[0].user_name, "Alice");
        }
        other => panic!("expected room-state, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_user_id_is_rejected_with_policy_violation() {
    let server = start_server().await;

    let mut ws = connect(&server, "roomId=r1").await;

    let frame = wait_close(&mut ws).await.expect("expected a close frame");
    assert_eq!(u16::from(frame.code), 1008);

    let health = health(&server).await;
    assert_eq!(health["rooms"], 0);
    assert_eq!(health["totalParticipants"], 0);
}

#[tokio::test]
async fn test_missing_user_name_defaults_to_anonymous() {
    let server = start_server().await;
    let mut alice = join(&server, "r1", "alice", "Alice").await;

    let _bob = connect(&server, "roomId=r1&userId=bob").await;

    match next_signal(&mut alice).await {
        SignalMessage::UserJoined { user_name, .. } => assert_eq!(user_name, "Anonymous"),
        other => panic!("expected user-joined, got {other:?}"),
    }
}

#[tokio::test]
async fn test_offer_is_forwarded_with_sender_stamp() {
    let server = start_server().await;
    let mut alice = join(&server, "r1", "alice", "Alice").await;
    let mut bob = join(&server, "r1", "bob", "Bob").await;
    next_signal(&mut alice).await; // user-joined bob

    send_signal(&mut alice, &test_offer("bob")).await;

    match next_signal(&mut bob).await {
        SignalMessage::Offer {
            target_user_id,
            offer,
            user_id,
            user_name,
            timestamp,
        } => {
            assert_eq!(target_user_id, "bob");
            assert_eq!(offer.sdp_type, "offer");
            assert_eq!(user_id.as_deref(), Some("alice"));
            assert_eq!(user_name.as_deref(), Some("Alice"));
            assert!(timestamp.is_some());
        }
        other => panic!("expected offer, got {other:?}"),
    }
}

#[tokio::test]
async fn test_delivery_failure_is_reported_to_sender_only() {
    let server = start_server().await;
    let mut alice = join(&server, "r1", "alice", "Alice").await;
    let mut bob = join(&server, "r1", "bob", "Bob").await;
    next_signal(&mut alice).await; // user-joined bob

    send_signal(&mut alice, &test_candidate("carol")).await;

    match next_signal(&mut alice).await {
        SignalMessage::Error { message, .. } => {
            assert!(message.contains("carol"), "error should name the target");
        }
        other => panic!("expected error message, got {other:?}"),
    }
    assert_silent(&mut bob).await;
}

#[tokio::test]
async fn test_malformed_payload_gets_error_and_connection_survives() {
    let server = start_server().await;
    let mut alice = join(&server, "r1", "alice", "Alice").await;

    alice
        .send(Message::Text("this is not json".into()))
        .await
        .expect("send");

    match next_signal(&mut alice).await {
        SignalMessage::Error { message, .. } => assert_eq!(message, "Invalid message format"),
        other => panic!("expected error message, got {other:?}"),
    }

    // connection and membership must be intact
    send_signal(&mut alice, &SignalMessage::Ping { timestamp: 1 }).await;
    assert!(matches!(
        next_signal(&mut alice).await,
        SignalMessage::Pong { .. }
    ));
    let health = health(&server).await;
    assert_eq!(health["totalParticipants"], 1);
}

#[tokio::test]
async fn test_unknown_kind_is_ignored() {
    let server = start_server().await;
    let mut alice = join(&server, "r1", "alice", "Alice").await;

    alice
        .send(Message::Text(r#"{"type":"hologram","x":1}"#.into()))
        .await
        .expect("send");

    assert_silent(&mut alice).await;
    let health = health(&server).await;
    assert_eq!(health["totalParticipants"], 1);
}

#[tokio::test]
async fn test_chat_is_broadcast_to_everyone_but_the_sender() {
    let server = start_server().await;
    let mut alice = join(&server, "r1", "alice", "Alice").await;
    let mut bob = join(&server, "r1", "bob", "Bob").await;
    next_signal(&mut alice).await; // user-joined bob

    let chat = ChatMessage {
        id: uuid::Uuid::new_v4(),
        sender_id: "alice".to_string(),
        sender_name: "Alice".to_string(),
        body: "hello room".to_string(),
        timestamp: 1000,
        kind: ChatKind::Text,
    };
    send_signal(
        &mut alice,
        &SignalMessage::Chat {
            message_data: chat.clone(),
            user_id: None,
            user_name: None,
            timestamp: None,
        },
    )
    .await;

    match next_signal(&mut bob).await {
        SignalMessage::Chat {
            message_data,
            user_id,
            ..
        } => {
            assert_eq!(message_data.body, "hello room");
            assert_eq!(user_id.as_deref(), Some("alice"));
        }
        other => panic!("expected chat-message, got {other:?}"),
    }
    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn test_rejoin_evicts_stale_session() {
    let server = start_server().await;
    let mut alice_v1 = join(&server, "r1", "alice", "Alice").await;
    let mut bob = join(&server, "r1", "bob", "Bob").await;
    next_signal(&mut alice_v1).await; // user-joined bob

    let _alice_v2 = join(&server, "r1", "alice", "Alice").await;

    // the stale session's socket is closed by the server
    let frame = wait_close(&mut alice_v1).await;
    if let Some(frame) = frame {
        assert_eq!(u16::from(frame.code), 1000);
    }

    // remaining members see exactly one user-left then one user-joined
    match next_signal(&mut bob).await {
        SignalMessage::UserLeft { user_id, .. } => assert_eq!(user_id, "alice"),
        other => panic!("expected user-left, got {other:?}"),
    }
    match next_signal(&mut bob).await {
        SignalMessage::UserJoined { user_id, .. } => assert_eq!(user_id, "alice"),
        other => panic!("expected user-joined, got {other:?}"),
    }
    assert_silent(&mut bob).await;

    // exactly one live alice entry
    let health = health(&server).await;
    assert_eq!(health["rooms"], 1);
    assert_eq!(health["totalParticipants"], 2);
}

#[tokio::test]
async fn test_departure_broadcasts_user_left() {
    let server = start_server().await;
    let mut alice = join(&server, "r1", "alice", "Alice").await;
    let mut bob = join(&server, "r1", "bob", "Bob").await;
    next_signal(&mut alice).await; // user-joined bob

    bob.close(None).await.expect("close");

    match next_signal(&mut alice).await {
        SignalMessage::UserLeft { user_id, .. } => assert_eq!(user_id, "bob"),
        other => panic!("expected user-left, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_room_survives_grace_window_then_disappears() {
    let config = ServerConfig {
        empty_room_grace: Duration::from_millis(200),
        ..test_config()
    };
    let server = start_server_with(config).await;

    let mut alice = join(&server, "r1", "alice", "Alice").await;
    alice.close(None).await.expect("close");

    // inside the grace window the room is retained
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(health(&server).await["rooms"], 1);

    // past the grace window it is gone
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(health(&server).await["rooms"], 0);
}

#[tokio::test]
async fn test_rejoin_within_grace_window_cancels_deletion() {
    let config = ServerConfig {
        empty_room_grace: Duration::from_millis(200),
        ..test_config()
    };
    let server = start_server_with(config).await;

    let mut alice = join(&server, "r1", "alice", "Alice").await;
    alice.close(None).await.expect("close");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let _alice_again = join(&server, "r1", "alice", "Alice").await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    let health = health(&server).await;
    assert_eq!(health["rooms"], 1);
    assert_eq!(health["totalParticipants"], 1);
}

#[tokio::test]
async fn test_reemptied_room_is_not_deleted_by_the_first_grace_timer() {
    let config = ServerConfig {
        empty_room_grace: Duration::from_millis(300),
        ..test_config()
    };
    let server = start_server_with(config).await;

    // first departure arms a grace timer
    let mut alice = join(&server, "r1", "alice", "Alice").await;
    alice.close(None).await.expect("close");

    // rejoin and leave again while that timer is still sleeping
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut alice_again = join(&server, "r1", "alice", "Alice").await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    alice_again.close(None).await.expect("close");

    // the first timer has fired by now, but the current emptiness is
    // younger than the grace window, so the room must survive
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(health(&server).await["rooms"], 1);

    // once the second departure's window expires the room goes away
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(health(&server).await["rooms"], 0);
}

#[tokio::test]
async fn test_server_pings_idle_connections() {
    let config = ServerConfig {
        ping_interval: Duration::from_millis(100),
        ..test_config()
    };
    let server = start_server_with(config).await;
    let mut alice = join(&server, "r1", "alice", "Alice").await;

    let deadline = tokio::time::sleep(Duration::from_secs(2));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => panic!("timed out waiting for a liveness ping"),
            frame = alice.next() => match frame {
                Some(Ok(Message::Ping(_))) => break,
                Some(Ok(_)) => continue,
                other => panic!("connection dropped before a ping arrived: {other:?}"),
            },
        }
    }
}

#[tokio::test]
async fn test_root_path_reports_liveness_with_cors() {
    let server = start_server().await;

    let response = reqwest::get(format!("{}/", server.http_url()))
        .await
        .expect("request failed");

    assert!(response.status().is_success());
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .map(|v| v.to_str().unwrap_or_default()),
        Some("*")
    );
    let body = response.text().await.expect("body");
    assert_eq!(body, "WebRTC Signaling Server is running");
}
