//! The client connection manager.
//!
//! One instance per local participant. It owns the local media stream and
//! one peer connection per remote participant, drives the offer/answer/ICE
//! exchange over whichever signaling transport is available, and surfaces
//! call activity through an event channel.

use std::{collections::HashMap, sync::Arc, time::Duration};

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use parley_shared::{
    protocol::{ChatKind, ChatMessage, MAX_CHAT_BODY_LEN, SessionDescription, SignalMessage},
    time::now_millis,
};

use crate::{
    error::{ClientError, DeviceError},
    media::{MediaSource, MediaStream, MediaTrack},
    rtc::{PeerApi, PeerConnection, PeerEvent, PeerState},
    transport::{LoopbackHub, SignalingTransport, TransportKind, WebSocketTransport},
};

/// Lifecycle of a manager instance. `Disconnected` is reachable from any
/// state on transport loss; re-entering `Connecting` happens only through an
/// explicit reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Call activity surfaced to the embedding application.
#[derive(Debug)]
pub enum ManagerEvent {
    /// A remote participant's media arrived.
    StreamAdded {
        peer_id: String,
        peer_name: String,
        stream: MediaStream,
    },
    /// A remote participant's media went away.
    StreamRemoved { peer_id: String },
    /// A peer connection changed state.
    PeerStateChanged { peer_id: String, state: PeerState },
    /// A chat message from another participant.
    Chat(ChatMessage),
    /// The signaling transport ended; an explicit reconnect is required.
    SignalingLost,
}

/// Events fed back into the manager's own loop.
#[derive(Debug)]
enum InternalEvent {
    Peer(String, PeerEvent),
    ScreenShareEnded,
}

/// Construction parameters for a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub room_id: String,
    pub user_id: String,
    pub user_name: String,
    /// WebSocket endpoint of the signaling server.
    pub server_url: String,
    /// How long the primary transport may take to reach its connected
    /// handshake before the loopback fallback takes over.
    pub connect_timeout: Duration,
}

impl ManagerConfig {
    pub fn new(
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            server_url: "ws://127.0.0.1:3001/ws".to_string(),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

struct Peer {
    name: String,
    conn: Box<dyn PeerConnection>,
    stream: Option<MediaStream>,
    forwarder: Option<JoinHandle<()>>,
}

enum Step {
    Signal(Option<SignalMessage>),
    Internal(InternalEvent),
}

pub struct ConnectionManager {
    config: ManagerConfig,
    media: Arc<dyn MediaSource>,
    peer_api: Arc<dyn PeerApi>,
    hub: LoopbackHub,
    events: mpsc::UnboundedSender<ManagerEvent>,
    state: ManagerState,
    local_stream: Option<MediaStream>,
    camera_video: Option<MediaTrack>,
    screen_stream: Option<MediaStream>,
    peers: HashMap<String, Peer>,
    messages: Vec<ChatMessage>,
    transport: Option<Box<dyn SignalingTransport>>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
}

impl ConnectionManager {
    pub fn new(
        config: ManagerConfig,
        media: Arc<dyn MediaSource>,
        peer_api: Arc<dyn PeerApi>,
        hub: LoopbackHub,
        events: mpsc::UnboundedSender<ManagerEvent>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            config,
            media,
            peer_api,
            hub,
            events,
            state: ManagerState::Idle,
            local_stream: None,
            camera_video: None,
            screen_stream: None,
            peers: HashMap::new(),
            messages: Vec::new(),
            transport: None,
            internal_tx,
            internal_rx,
        }
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.local_stream.as_ref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn has_peer(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Connected peers as (id, display name) pairs.
    pub fn peer_roster(&self) -> Vec<(String, String)> {
        self.peers
            .iter()
            .map(|(id, peer)| (id.clone(), peer.name.clone()))
            .collect()
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.transport.as_ref().map(|t| t.kind())
    }

    /// Acquire the local camera/microphone stream. Must precede
    /// [`Self::connect`]; peers negotiated afterwards carry these tracks.
    /// Device failure is fatal to call setup and never retried internally.
    pub async fn init_media(
        &mut self,
        video: bool,
        audio: bool,
    ) -> Result<MediaStream, ClientError> {
        let stream = self.media.capture_camera(video, audio).await?;
        self.camera_video = stream.video_track().cloned();
        self.local_stream = Some(stream.clone());
        Ok(stream)
    }

    /// Open the signaling transport.
    ///
    /// The primary path is a WebSocket to the signaling server; if it does
    /// not reach its connected handshake within the configured timeout, the
    /// in-process loopback channel takes over so same-process calls keep
    /// working without a server.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if self.local_stream.is_none() {
            return Err(ClientError::MediaNotInitialized);
        }
        self.state = ManagerState::Connecting;

        let name = utf8_percent_encode(&self.config.user_name, NON_ALPHANUMERIC);
        let url = format!(
            "{}?roomId={}&userId={}&userName={}",
            self.config.server_url, self.config.room_id, self.config.user_id, name,
        );

        match WebSocketTransport::connect(&url, self.config.connect_timeout).await {
            Ok(transport) => {
                tracing::info!(room = %self.config.room_id, "connected to signaling server");
                self.transport = Some(Box::new(transport));
            }
            Err(e) => {
                tracing::warn!(
                    room = %self.config.room_id,
                    "signaling server unreachable ({e}), using loopback fallback"
                );
                let mut transport = self
                    .hub
                    .join(&self.config.room_id, &self.config.user_id);
                let announce = SignalMessage::UserJoined {
                    user_id: self.config.user_id.clone(),
                    user_name: self.config.user_name.clone(),
                    timestamp: now_millis(),
                };
                transport.send(&announce).await?;
                self.transport = Some(Box::new(transport));
            }
        }

        self.state = ManagerState::Connected;
        Ok(())
    }

    /// Tear down the current transport and every peer, then re-run the full
    /// connect sequence from a clean slate.
    pub async fn reconnect(&mut self) -> Result<(), ClientError> {
        tracing::info!(room = %self.config.room_id, "reconnecting");
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        let peer_ids: Vec<String> = self.peers.keys().cloned().collect();
        for peer_id in peer_ids {
            self.remove_peer(&peer_id);
        }
        self.connect().await
    }

    /// Process events until the signaling transport ends.
    pub async fn run(&mut self) {
        while self.step().await {}
    }

    /// Process one signaling or peer event. Returns `false` once the
    /// transport has ended; the manager is then in `Disconnected` and waits
    /// for an explicit reconnect.
    pub async fn step(&mut self) -> bool {
        let next = {
            let Some(transport) = self.transport.as_mut() else {
                return false;
            };
            tokio::select! {
                msg = transport.recv() => Step::Signal(msg),
                ev = self.internal_rx.recv() => match ev {
                    Some(ev) => Step::Internal(ev),
                    // we always hold a sender, so this cannot close
                    None => return false,
                },
            }
        };

        match next {
            Step::Signal(Some(msg)) => {
                self.handle_signal(msg).await;
                true
            }
            Step::Signal(None) => {
                tracing::warn!(room = %self.config.room_id, "signaling transport lost");
                self.transport = None;
                self.state = ManagerState::Disconnected;
                let _ = self.events.send(ManagerEvent::SignalingLost);
                false
            }
            Step::Internal(ev) => {
                self.handle_internal(ev).await;
                true
            }
        }
    }

    /// Dispatch one inbound signaling message.
    pub async fn handle_signal(&mut self, msg: SignalMessage) {
        match msg {
            SignalMessage::Connected { room_id, .. } => {
                tracing::debug!(room = %room_id, "signaling handshake acknowledged");
                self.state = ManagerState::Connected;
            }
            SignalMessage::RoomState { participants, .. } => {
                // existing members initiate the offer towards a newcomer,
                // so the snapshot is informational here
                tracing::info!(members = participants.len(), "received room state");
            }
            SignalMessage::UserJoined {
                user_id, user_name, ..
            } => {
                if user_id != self.config.user_id {
                    self.initiate_offer(user_id, user_name).await;
                }
            }
            SignalMessage::UserLeft { user_id, .. } => {
                self.remove_peer(&user_id);
            }
            SignalMessage::Offer {
                user_id: Some(from),
                user_name,
                offer,
                ..
            } => {
                let name = user_name.unwrap_or_else(|| from.clone());
                self.accept_offer(from, name, offer).await;
            }
            SignalMessage::Answer {
                user_id: Some(from),
                answer,
                ..
            } => {
                // defensive: a late answer for a peer we dropped is a no-op
                let result = match self.peers.get(&from) {
                    Some(peer) => peer.conn.set_remote_description(answer).await,
                    None => return,
                };
                if let Err(e) = result {
                    tracing::warn!(peer = %from, "failed to apply answer: {e}");
                    self.remove_peer(&from);
                }
            }
            SignalMessage::IceCandidate {
                user_id: Some(from),
                candidate,
                ..
            } => {
                // defensive no-op when the peer is unknown
                let result = match self.peers.get(&from) {
                    Some(peer) => peer.conn.add_ice_candidate(candidate).await,
                    None => return,
                };
                if let Err(e) = result {
                    tracing::warn!(peer = %from, "failed to apply ICE candidate: {e}");
                }
            }
            SignalMessage::Offer { user_id: None, .. }
            | SignalMessage::Answer { user_id: None, .. }
            | SignalMessage::IceCandidate { user_id: None, .. } => {
                tracing::warn!("ignoring negotiation message without sender identity");
            }
            SignalMessage::Chat { message_data, .. } => {
                if message_data.sender_id != self.config.user_id {
                    self.messages.push(message_data.clone());
                    let _ = self.events.send(ManagerEvent::Chat(message_data));
                }
            }
            SignalMessage::Error { message, .. } => {
                tracing::warn!("signaling error: {message}");
            }
            SignalMessage::Pong { .. } | SignalMessage::Ping { .. } => {}
            SignalMessage::Unknown => {
                tracing::debug!("ignoring unknown signaling message");
            }
        }
    }

    /// Flip the enabled flag on the local video track. No renegotiation;
    /// peers observe a muted track, not a dropped connection.
    pub fn toggle_video(&self, enabled: bool) {
        if let Some(track) = self.local_stream.as_ref().and_then(|s| s.video_track()) {
            track.set_enabled(enabled);
        }
    }

    /// Flip the enabled flag on the local audio track.
    pub fn toggle_audio(&self, enabled: bool) {
        if let Some(track) = self.local_stream.as_ref().and_then(|s| s.audio_track()) {
            track.set_enabled(enabled);
        }
    }

    /// Acquire a display-capture stream and swap it onto every peer's
    /// outgoing video sender in place. No renegotiation happens; the
    /// existing transceivers are reused. When the platform ends the capture
    /// (the user hits "stop sharing"), the camera track is restored
    /// automatically.
    pub async fn start_screen_share(&mut self) -> Result<MediaStream, ClientError> {
        let display = self.media.capture_display().await?;
        let track = display.video_track().cloned().ok_or_else(|| {
            DeviceError::NotAvailable("display capture produced no video track".to_string())
        })?;

        for peer in self.peers.values() {
            peer.conn.replace_video_track(track.clone());
        }

        let ended = self.internal_tx.clone();
        track.on_ended(move || {
            let _ = ended.send(InternalEvent::ScreenShareEnded);
        });

        self.screen_stream = Some(display.clone());
        tracing::info!(peers = self.peers.len(), "screen share started");
        Ok(display)
    }

    /// Stop sharing and restore the camera track on every peer.
    pub fn stop_screen_share(&mut self) {
        let Some(screen) = self.screen_stream.take() else {
            return;
        };
        screen.stop_all();
        if let Some(camera) = self.camera_video.clone() {
            for peer in self.peers.values() {
                peer.conn.replace_video_track(camera.clone());
            }
        }
        tracing::info!("screen share stopped");
    }

    /// Append a chat message locally and relay it to the room. No delivery
    /// receipt is modeled.
    pub async fn send_chat(&mut self, body: &str) -> Result<ChatMessage, ClientError> {
        if self.transport.is_none() {
            return Err(ClientError::NotConnected);
        }
        let body = body.trim();
        if body.is_empty() || body.chars().count() > MAX_CHAT_BODY_LEN {
            return Err(ClientError::InvalidChatBody);
        }

        let message = ChatMessage {
            id: Uuid::new_v4(),
            sender_id: self.config.user_id.clone(),
            sender_name: self.config.user_name.clone(),
            body: body.to_string(),
            timestamp: now_millis(),
            kind: ChatKind::Text,
        };
        self.messages.push(message.clone());
        self.send_signal(SignalMessage::Chat {
            message_data: message.clone(),
            user_id: None,
            user_name: None,
            timestamp: None,
        })
        .await;
        Ok(message)
    }

    /// Leave the room: announce departure, close every peer connection,
    /// stop local media, and release the transport. Safe to call twice.
    pub async fn leave(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let goodbye = SignalMessage::UserLeft {
                user_id: self.config.user_id.clone(),
                timestamp: now_millis(),
            };
            if let Err(e) = transport.send(&goodbye).await {
                tracing::debug!("failed to announce departure: {e}");
            }
            transport.close().await;
        }

        let peer_ids: Vec<String> = self.peers.keys().cloned().collect();
        for peer_id in peer_ids {
            self.remove_peer(&peer_id);
        }

        if let Some(stream) = self.local_stream.take() {
            stream.stop_all();
        }
        self.camera_video = None;
        if let Some(screen) = self.screen_stream.take() {
            screen.stop_all();
        }

        self.state = ManagerState::Idle;
        tracing::info!(room = %self.config.room_id, "left room");
    }

    /// A remote participant appeared: open a connection and send the offer.
    async fn initiate_offer(&mut self, peer_id: String, peer_name: String) {
        tracing::info!(peer = %peer_id, name = %peer_name, "peer joined, sending offer");
        if let Err(e) = self.create_peer(&peer_id, &peer_name).await {
            tracing::warn!(peer = %peer_id, "failed to create peer connection: {e}");
            return;
        }

        // the peer may vanish during any await; re-check before each use
        let offer = match self.peers.get(&peer_id) {
            Some(peer) => match peer.conn.create_offer().await {
                Ok(offer) => offer,
                Err(e) => {
                    tracing::warn!(peer = %peer_id, "failed to create offer: {e}");
                    self.remove_peer(&peer_id);
                    return;
                }
            },
            None => return,
        };
        let applied = match self.peers.get(&peer_id) {
            Some(peer) => peer.conn.set_local_description(offer.clone()).await,
            None => return,
        };
        if let Err(e) = applied {
            tracing::warn!(peer = %peer_id, "failed to apply local description: {e}");
            self.remove_peer(&peer_id);
            return;
        }

        self.send_signal(SignalMessage::Offer {
            target_user_id: peer_id,
            offer,
            user_id: None,
            user_name: None,
            timestamp: None,
        })
        .await;
    }

    /// An offer arrived: open (or replace) the connection and answer it.
    async fn accept_offer(&mut self, from: String, name: String, offer: SessionDescription) {
        tracing::info!(peer = %from, "received offer, sending answer");
        if let Err(e) = self.create_peer(&from, &name).await {
            tracing::warn!(peer = %from, "failed to create peer connection: {e}");
            return;
        }

        let applied = match self.peers.get(&from) {
            Some(peer) => peer.conn.set_remote_description(offer).await,
            None => return,
        };
        if let Err(e) = applied {
            tracing::warn!(peer = %from, "failed to apply offer: {e}");
            self.remove_peer(&from);
            return;
        }

        let answer = match self.peers.get(&from) {
            Some(peer) => match peer.conn.create_answer().await {
                Ok(answer) => answer,
                Err(e) => {
                    tracing::warn!(peer = %from, "failed to create answer: {e}");
                    self.remove_peer(&from);
                    return;
                }
            },
            None => return,
        };
        let applied = match self.peers.get(&from) {
            Some(peer) => peer.conn.set_local_description(answer.clone()).await,
            None => return,
        };
        if let Err(e) = applied {
            tracing::warn!(peer = %from, "failed to apply local description: {e}");
            self.remove_peer(&from);
            return;
        }

        self.send_signal(SignalMessage::Answer {
            target_user_id: from,
            answer,
            user_id: None,
            user_name: None,
            timestamp: None,
        })
        .await;
    }

    /// Open a connection for a remote participant, attaching the local
    /// tracks. An existing entry for the same participant is replaced.
    async fn create_peer(
        &mut self,
        peer_id: &str,
        peer_name: &str,
    ) -> Result<(), crate::error::NegotiationError> {
        if let Some(old) = self.peers.remove(peer_id) {
            tracing::debug!(peer = %peer_id, "replacing existing peer connection");
            old.conn.close();
            if let Some(forwarder) = old.forwarder {
                forwarder.abort();
            }
        }

        let conn = self.peer_api.create_peer().await?;
        if let Some(stream) = &self.local_stream {
            for track in stream.tracks() {
                conn.add_track(track.clone());
            }
        }
        // a peer joining mid-share gets the screen track on its video sender
        if let Some(track) = self.screen_stream.as_ref().and_then(|s| s.video_track()) {
            conn.replace_video_track(track.clone());
        }

        let forwarder = conn.take_events().map(|mut rx| {
            let internal = self.internal_tx.clone();
            let id = peer_id.to_string();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if internal.send(InternalEvent::Peer(id.clone(), event)).is_err() {
                        break;
                    }
                }
            })
        });

        self.peers.insert(
            peer_id.to_string(),
            Peer {
                name: peer_name.to_string(),
                conn,
                stream: None,
                forwarder,
            },
        );
        Ok(())
    }

    async fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::Peer(peer_id, PeerEvent::StateChanged(state)) => {
                if !self.peers.contains_key(&peer_id) {
                    return;
                }
                let _ = self.events.send(ManagerEvent::PeerStateChanged {
                    peer_id: peer_id.clone(),
                    state,
                });
                if state.is_terminal_failure() {
                    tracing::warn!(peer = %peer_id, ?state, "peer connection lost");
                    self.remove_peer(&peer_id);
                }
            }
            InternalEvent::Peer(peer_id, PeerEvent::RemoteStream(stream)) => {
                let Some(peer) = self.peers.get_mut(&peer_id) else {
                    return;
                };
                peer.stream = Some(stream.clone());
                let peer_name = peer.name.clone();
                let _ = self.events.send(ManagerEvent::StreamAdded {
                    peer_id,
                    peer_name,
                    stream,
                });
            }
            InternalEvent::Peer(peer_id, PeerEvent::LocalCandidate(candidate)) => {
                if !self.peers.contains_key(&peer_id) {
                    return;
                }
                self.send_signal(SignalMessage::IceCandidate {
                    target_user_id: peer_id,
                    candidate,
                    user_id: None,
                    user_name: None,
                    timestamp: None,
                })
                .await;
            }
            InternalEvent::ScreenShareEnded => {
                self.stop_screen_share();
            }
        }
    }

    /// Tear down one peer. Isolated: other connections and the local stream
    /// are untouched, and a dead entry never lingers in the table.
    fn remove_peer(&mut self, peer_id: &str) {
        if let Some(peer) = self.peers.remove(peer_id) {
            peer.conn.close();
            if let Some(forwarder) = peer.forwarder {
                forwarder.abort();
            }
            let _ = self.events.send(ManagerEvent::StreamRemoved {
                peer_id: peer_id.to_string(),
            });
            tracing::info!(peer = %peer_id, "peer removed");
        }
    }

    /// Stamp our identity onto the message and send it over whichever
    /// transport is active. The server re-stamps relayed kinds with its own
    /// timestamp; on the loopback path our stamp is what peers see.
    async fn send_signal(&mut self, mut msg: SignalMessage) {
        msg.stamp_sender(&self.config.user_id, &self.config.user_name, now_millis());
        match self.transport.as_mut() {
            Some(transport) => {
                if let Err(e) = transport.send(&msg).await {
                    tracing::warn!(kind = msg.kind_str(), "failed to send signaling message: {e}");
                }
            }
            None => {
                tracing::debug!(kind = msg.kind_str(), "no transport, dropping message");
            }
        }
    }
}
