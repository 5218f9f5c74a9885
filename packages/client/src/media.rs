//! Media stream handles and the capture-device seam.
//!
//! The signaling layer never inspects media; it only holds opaque handles,
//! flips their enabled flags, and swaps tracks between senders. Capture
//! itself lives behind [`MediaSource`] so the manager is decoupled from any
//! specific platform API.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DeviceError;

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

type EndedHook = Box<dyn Fn() + Send + Sync>;

struct TrackInner {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    ended: AtomicBool,
    on_ended: Mutex<Vec<EndedHook>>,
}

/// A cheaply clonable handle to one media track.
///
/// Disabling a track mutes its output without renegotiation; the track keeps
/// existing and peers observe silence or frozen video, not a dropped
/// connection. Stopping a track is terminal and fires the registered
/// on-ended hooks exactly once.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4().to_string(),
                kind,
                enabled: AtomicBool::new(true),
                ended: AtomicBool::new(false),
                on_ended: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::SeqCst)
    }

    /// Register a hook invoked when the track ends, e.g. the platform-level
    /// "stop sharing" control for a display-capture track.
    pub fn on_ended(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner
            .on_ended
            .lock()
            .expect("track hook lock poisoned")
            .push(Box::new(hook));
    }

    /// End the track. Idempotent; hooks fire only on the first call.
    pub fn stop(&self) {
        if self.inner.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let hooks = self
            .inner
            .on_ended
            .lock()
            .expect("track hook lock poisoned");
        for hook in hooks.iter() {
            hook();
        }
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// An opaque bundle of tracks, as handed out by a capture device.
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// The capture-device seam.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire the local camera/microphone stream.
    async fn capture_camera(&self, video: bool, audio: bool) -> Result<MediaStream, DeviceError>;

    /// Acquire a display-capture stream for screen sharing.
    async fn capture_display(&self) -> Result<MediaStream, DeviceError>;
}

/// Synthetic capture source for demos and tests: produces inert tracks with
/// the requested kinds and never fails.
pub struct StubMediaSource;

#[async_trait]
impl MediaSource for StubMediaSource {
    async fn capture_camera(&self, video: bool, audio: bool) -> Result<MediaStream, DeviceError> {
        let mut tracks = Vec::new();
        if video {
            tracks.push(MediaTrack::new(TrackKind::Video));
        }
        if audio {
            tracks.push(MediaTrack::new(TrackKind::Audio));
        }
        Ok(MediaStream::new(tracks))
    }

    async fn capture_display(&self) -> Result<MediaStream, DeviceError> {
        Ok(MediaStream::new(vec![MediaTrack::new(TrackKind::Video)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_new_track_starts_enabled_and_live() {
        let track = MediaTrack::new(TrackKind::Video);

        assert!(track.is_enabled());
        assert!(!track.is_ended());
    }

    #[test]
    fn test_set_enabled_flips_only_the_flag() {
        let track = MediaTrack::new(TrackKind::Audio);

        track.set_enabled(false);
        assert!(!track.is_enabled());
        assert!(!track.is_ended());

        track.set_enabled(true);
        assert!(track.is_enabled());
    }

    #[test]
    fn test_stop_fires_hooks_exactly_once() {
        let track = MediaTrack::new(TrackKind::Video);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        track.on_ended(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        track.stop();
        track.stop();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(track.is_ended());
    }

    #[test]
    fn test_clones_share_state() {
        let track = MediaTrack::new(TrackKind::Video);
        let clone = track.clone();

        clone.set_enabled(false);

        assert!(!track.is_enabled());
    }

    #[test]
    fn test_stream_track_lookup_by_kind() {
        let video = MediaTrack::new(TrackKind::Video);
        let audio = MediaTrack::new(TrackKind::Audio);
        let stream = MediaStream::new(vec![video.clone(), audio.clone()]);

        assert_eq!(stream.video_track().unwrap().id(), video.id());
        assert_eq!(stream.audio_track().unwrap().id(), audio.id());
    }

    #[tokio::test]
    async fn test_stub_source_honors_requested_kinds() {
        let source = StubMediaSource;

        let stream = source.capture_camera(true, false).await.unwrap();

        assert!(stream.video_track().is_some());
        assert!(stream.audio_track().is_none());
    }
}
