//! The real-time peer-connection seam.
//!
//! The manager drives negotiation through these traits and never touches
//! ICE/DTLS/SRTP internals; whichever platform primitive backs the trait
//! (a browser bridge, a native stack, or the in-process stub below) owns
//! transport establishment and media flow.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use parley_shared::protocol::{IceCandidate, SessionDescription};

use crate::{
    error::NegotiationError,
    media::{MediaStream, MediaTrack, TrackKind},
};

/// Connection state of one negotiated peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// Terminal states that trigger removal of the peer entry.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, PeerState::Disconnected | PeerState::Failed)
    }
}

/// Asynchronous notifications surfaced by a peer connection.
#[derive(Debug)]
pub enum PeerEvent {
    /// The platform gathered a local ICE candidate to relay to the peer.
    LocalCandidate(IceCandidate),
    /// The connection state changed.
    StateChanged(PeerState),
    /// Remote media arrived.
    RemoteStream(MediaStream),
}

/// One negotiated connection to exactly one remote participant.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    /// Attach a local track to this connection's outgoing senders.
    fn add_track(&self, track: MediaTrack);

    /// Swap the outgoing video track in place, reusing the existing
    /// transceiver. No renegotiation results.
    fn replace_video_track(&self, track: MediaTrack);

    /// Take the event receiver for this connection. Yields `Some` exactly
    /// once; the manager forwards the events into its own loop.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>>;

    fn connection_state(&self) -> PeerState;

    fn close(&self);
}

/// Factory for peer connections.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeerApi: Send + Sync {
    async fn create_peer(&self) -> Result<Box<dyn PeerConnection>, NegotiationError>;
}

struct LocalPeerInner {
    state: PeerState,
    tracks: Vec<MediaTrack>,
    outbound_video: Option<MediaTrack>,
    events_rx: Option<mpsc::UnboundedReceiver<PeerEvent>>,
}

/// In-process peer connection for demos and tests.
///
/// Negotiation is simulated: applying a remote description immediately
/// "connects" the peer and surfaces a synthetic remote stream. No media or
/// network traffic exists.
pub struct LocalPeerConnection {
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    inner: Mutex<LocalPeerInner>,
}

impl LocalPeerConnection {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            events_tx,
            inner: Mutex::new(LocalPeerInner {
                state: PeerState::New,
                tracks: Vec::new(),
                outbound_video: None,
                events_rx: Some(events_rx),
            }),
        }
    }

    /// The video track currently on the outgoing sender, for assertions.
    pub fn outbound_video_track(&self) -> Option<MediaTrack> {
        self.lock().outbound_video.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LocalPeerInner> {
        self.inner.lock().expect("peer lock poisoned")
    }

    fn transition(&self, state: PeerState) {
        self.lock().state = state;
        let _ = self.events_tx.send(PeerEvent::StateChanged(state));
    }
}

impl Default for LocalPeerConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerConnection for LocalPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        Ok(SessionDescription::offer("v=0\r\ns=local-stub\r\n"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        Ok(SessionDescription::answer("v=0\r\ns=local-stub\r\n"))
    }

    async fn set_local_description(
        &self,
        _desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let mut inner = self.lock();
        if inner.state == PeerState::New {
            inner.state = PeerState::Connecting;
        }
        Ok(())
    }

    async fn set_remote_description(
        &self,
        _desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        if self.lock().state == PeerState::Closed {
            return Err(NegotiationError::Closed);
        }
        self.transition(PeerState::Connected);
        let remote = MediaStream::new(vec![
            MediaTrack::new(TrackKind::Video),
            MediaTrack::new(TrackKind::Audio),
        ]);
        let _ = self.events_tx.send(PeerEvent::RemoteStream(remote));
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), NegotiationError> {
        if self.lock().state == PeerState::Closed {
            return Err(NegotiationError::Closed);
        }
        Ok(())
    }

    fn add_track(&self, track: MediaTrack) {
        let mut inner = self.lock();
        if track.kind() == TrackKind::Video {
            inner.outbound_video = Some(track.clone());
        }
        inner.tracks.push(track);
    }

    fn replace_video_track(&self, track: MediaTrack) {
        self.lock().outbound_video = Some(track);
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.lock().events_rx.take()
    }

    fn connection_state(&self) -> PeerState {
        self.lock().state
    }

    fn close(&self) {
        let mut inner = self.lock();
        if inner.state != PeerState::Closed {
            inner.state = PeerState::Closed;
        }
    }
}

/// Factory for [`LocalPeerConnection`]s.
pub struct LocalPeerApi;

#[async_trait]
impl PeerApi for LocalPeerApi {
    async fn create_peer(&self) -> Result<Box<dyn PeerConnection>, NegotiationError> {
        Ok(Box::new(LocalPeerConnection::new()))
    }
}
