//! Signaling transports: the WebSocket primary path and the in-process
//! loopback fallback.
//!
//! Whichever transport is active carries the same typed envelope, so the
//! manager's dispatch logic never knows which one it is talking through.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{net::TcpStream, sync::broadcast};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};

use parley_shared::protocol::SignalMessage;

use crate::error::TransportError;

/// Which signaling path a transport represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// WebSocket connection to the signaling server.
    Primary,
    /// In-process loopback channel; same-process participants only.
    Fallback,
}

/// A bidirectional signaling channel carrying the typed envelope.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalingTransport: Send {
    async fn send(&mut self, msg: &SignalMessage) -> Result<(), TransportError>;

    /// Next inbound message, or `None` when the transport has ended.
    async fn recv(&mut self) -> Option<SignalMessage>;

    async fn close(&mut self);

    fn kind(&self) -> TransportKind;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The primary transport: a persistent WebSocket to the signaling server.
pub struct WebSocketTransport {
    write: SplitSink<WsStream, tungstenite::Message>,
    read: SplitStream<WsStream>,
    /// Messages received during the connect handshake, delivered before any
    /// further reads so the caller sees the server's ordering.
    pending: VecDeque<SignalMessage>,
}

impl WebSocketTransport {
    /// Connect and wait for the server's `connected` acknowledgement, all
    /// within `timeout`. Messages the server sends ahead of the ack (the
    /// room-state snapshot) are buffered and replayed through [`Self::recv`].
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let connect = async {
            let (stream, _response) = connect_async(url)
                .await
                .map_err(|e| TransportError::WebSocket(e.to_string()))?;
            let (write, read) = stream.split();
            let mut transport = Self {
                write,
                read,
                pending: VecDeque::new(),
            };

            loop {
                match transport.next_frame().await {
                    Some(msg) => {
                        let is_ack = matches!(msg, SignalMessage::Connected { .. });
                        transport.pending.push_back(msg);
                        if is_ack {
                            return Ok(transport);
                        }
                    }
                    None => return Err(TransportError::Closed),
                }
            }
        };

        tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }

    async fn next_frame(&mut self) -> Option<SignalMessage> {
        while let Some(frame) = self.read.next().await {
            match frame {
                Ok(tungstenite::Message::Text(text)) => {
                    match serde_json::from_str::<SignalMessage>(text.as_str()) {
                        Ok(msg) => return Some(msg),
                        Err(e) => {
                            tracing::warn!("discarding unparseable signaling frame: {e}");
                        }
                    }
                }
                Ok(tungstenite::Message::Close(_)) => return None,
                // pings are answered by the websocket layer
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("websocket read error: {e}");
                    return None;
                }
            }
        }
        None
    }
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn send(&mut self, msg: &SignalMessage) -> Result<(), TransportError> {
        let text = serde_json::to_string(msg).expect("signal messages always serialize");
        self.write
            .send(tungstenite::Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn recv(&mut self) -> Option<SignalMessage> {
        if let Some(msg) = self.pending.pop_front() {
            return Some(msg);
        }
        self.next_frame().await
    }

    async fn close(&mut self) {
        let _ = self.write.close().await;
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Primary
    }
}

/// One frame on a loopback room channel.
#[derive(Debug, Clone)]
pub struct LoopbackFrame {
    pub origin: String,
    pub msg: SignalMessage,
}

const LOOPBACK_CHANNEL_CAPACITY: usize = 64;

/// In-process fallback signaling hub.
///
/// The loopback rendition of the same-browser cross-tab storage channel:
/// every participant of a room shares one broadcast channel, scoped to this
/// process. It guarantees a working signaling path for same-process tests
/// and demos and is deliberately useless across hosts, so it can never be
/// mistaken for a real network transport.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    rooms: Arc<Mutex<HashMap<String, broadcast::Sender<LoopbackFrame>>>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a room, returning a transport filtered to this participant:
    /// own frames and frames targeted at someone else are dropped.
    pub fn join(&self, room_id: &str, user_id: &str) -> LoopbackTransport {
        let tx = self.channel(room_id);
        let rx = tx.subscribe();
        LoopbackTransport {
            user_id: user_id.to_string(),
            tx,
            rx: Some(rx),
        }
    }

    /// Observe every frame on a room channel, unfiltered.
    pub fn tap(&self, room_id: &str) -> LoopbackTap {
        LoopbackTap {
            rx: self.channel(room_id).subscribe(),
        }
    }

    fn channel(&self, room_id: &str) -> broadcast::Sender<LoopbackFrame> {
        let mut rooms = self.rooms.lock().expect("hub lock poisoned");
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(LOOPBACK_CHANNEL_CAPACITY).0)
            .clone()
    }
}

/// A participant's handle on a loopback room channel.
pub struct LoopbackTransport {
    user_id: String,
    tx: broadcast::Sender<LoopbackFrame>,
    rx: Option<broadcast::Receiver<LoopbackFrame>>,
}

#[async_trait]
impl SignalingTransport for LoopbackTransport {
    async fn send(&mut self, msg: &SignalMessage) -> Result<(), TransportError> {
        if self.rx.is_none() {
            return Err(TransportError::Closed);
        }
        // no receivers is fine: an empty room simply drops the frame
        let _ = self.tx.send(LoopbackFrame {
            origin: self.user_id.clone(),
            msg: msg.clone(),
        });
        Ok(())
    }

    async fn recv(&mut self) -> Option<SignalMessage> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(frame) => {
                    if frame.origin == self.user_id {
                        continue;
                    }
                    if let Some(target) = frame.msg.target_user_id()
                        && target != self.user_id
                    {
                        continue;
                    }
                    return Some(frame.msg);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "loopback receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn close(&mut self) {
        self.rx = None;
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Fallback
    }
}

/// Unfiltered observer of a loopback room channel.
pub struct LoopbackTap {
    rx: broadcast::Receiver<LoopbackFrame>,
}

impl LoopbackTap {
    pub async fn next(&mut self) -> Option<LoopbackFrame> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
