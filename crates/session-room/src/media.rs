//! Local media ownership.
//!
//! `MediaSessionManager` owns the camera + microphone stream for one room:
//!
//! - Acquisition goes through the [`MediaDevices`] seam and is never retried
//! - Toggles flip a track's `enabled` flag in place. The track (and its
//!   sender) keeps existing, so re-enabling needs no renegotiation and the
//!   remote side can show a muted indicator
//! - `release()` stops every track exactly once, however many exit paths call it
//!
//! A stream is never reused after release and never shared across rooms.

use crate::errors::MediaError;

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// A single capture track.
#[derive(Debug)]
pub struct MediaTrack {
    id: Uuid,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    stop_calls: AtomicU32,
}

impl MediaTrack {
    fn new(kind: TrackKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            stop_calls: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Set the enabled flag. Has no effect on a stopped track.
    pub fn set_enabled(&self, enabled: bool) {
        if !self.is_stopped() {
            self.enabled.store(enabled, Ordering::SeqCst);
        }
    }

    /// Stop capture. The device indicator goes dark once every track of the
    /// device is stopped.
    pub fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Number of times `stop()` was invoked on this track.
    #[must_use]
    pub fn stop_count(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

/// A set of tracks rendered together. Cloning shares the same tracks.
#[derive(Clone)]
pub struct MediaStream {
    id: Uuid,
    tracks: Arc<Vec<Arc<MediaTrack>>>,
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .field("active", &self.is_active())
            .finish()
    }
}

impl MediaStream {
    /// Create a stream with one fresh track per kind.
    #[must_use]
    pub fn with_tracks(kinds: &[TrackKind]) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks: Arc::new(
                kinds
                    .iter()
                    .map(|kind| Arc::new(MediaTrack::new(*kind)))
                    .collect(),
            ),
        }
    }

    /// Camera + microphone stream.
    #[must_use]
    pub fn camera_and_microphone() -> Self {
        Self::with_tracks(&[TrackKind::Video, TrackKind::Audio])
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    /// First track of `kind`, if any.
    #[must_use]
    pub fn track(&self, kind: TrackKind) -> Option<&Arc<MediaTrack>> {
        self.tracks.iter().find(|track| track.kind() == kind)
    }

    /// Whether any track is still live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(|track| !track.is_stopped())
    }

    /// Whether `other` is the very same stream object (not a reacquisition).
    #[must_use]
    pub fn same_stream(&self, other: &MediaStream) -> bool {
        Arc::ptr_eq(&self.tracks, &other.tracks)
    }

    /// Stop every track.
    pub fn stop(&self) {
        for track in self.tracks.iter() {
            track.stop();
        }
    }
}

/// What to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

/// Platform capture seam (browser `getUserMedia`, native capture...).
///
/// Implementations may never resolve (a permission prompt the user ignores);
/// callers must not block on them.
#[async_trait]
pub trait MediaDevices: Send + Sync + fmt::Debug {
    /// Request a stream satisfying `constraints`.
    async fn get_user_media(&self, constraints: MediaConstraints)
        -> Result<MediaStream, MediaError>;
}

/// Capture source producing synthetic tracks. Always grants.
#[derive(Debug, Default, Clone)]
pub struct SyntheticDevices;

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<MediaStream, MediaError> {
        let mut kinds = Vec::with_capacity(2);
        if constraints.video {
            kinds.push(TrackKind::Video);
        }
        if constraints.audio {
            kinds.push(TrackKind::Audio);
        }
        if kinds.is_empty() {
            return Err(MediaError::NoDevice);
        }
        Ok(MediaStream::with_tracks(&kinds))
    }
}

/// Observable local media state.
#[derive(Debug, Clone)]
pub struct LocalMediaState {
    pub stream: MediaStream,
    pub video_enabled: bool,
    pub audio_enabled: bool,
}

/// Owns the local stream for one room.
#[derive(Debug)]
pub struct MediaSessionManager {
    devices: Arc<dyn MediaDevices>,
    stream: Option<MediaStream>,
    released: bool,
}

impl MediaSessionManager {
    #[must_use]
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            stream: None,
            released: false,
        }
    }

    /// Build the capture request without borrowing the manager, so it can
    /// run on a helper task while the owner keeps processing events.
    pub fn request(
        &self,
    ) -> impl Future<Output = Result<MediaStream, MediaError>> + Send + 'static {
        let devices = Arc::clone(&self.devices);
        async move { devices.get_user_media(MediaConstraints::default()).await }
    }

    /// Request camera + microphone and take ownership of the result.
    ///
    /// # Errors
    ///
    /// Returns the device error unchanged. A manager that was already
    /// released refuses the stream with `MediaError::Unavailable`.
    pub async fn acquire(&mut self) -> Result<LocalMediaState, MediaError> {
        let stream = self.request().await?;
        if !self.attach(stream) {
            return Err(MediaError::Unavailable("media session released".to_string()));
        }
        self.state()
            .ok_or_else(|| MediaError::Unavailable("stream not attached".to_string()))
    }

    /// Take ownership of an acquired stream.
    ///
    /// Returns `false` (and stops the stream) if the manager was released or
    /// already owns a stream.
    pub fn attach(&mut self, stream: MediaStream) -> bool {
        if self.released || self.stream.is_some() {
            debug!(
                target: "room.media",
                stream_id = %stream.id(),
                released = self.released,
                "Discarding late media stream"
            );
            stream.stop();
            return false;
        }

        info!(
            target: "room.media",
            stream_id = %stream.id(),
            tracks = stream.tracks().len(),
            "Local media acquired"
        );
        self.stream = Some(stream);
        true
    }

    #[must_use]
    pub fn stream(&self) -> Option<&MediaStream> {
        self.stream.as_ref()
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    #[must_use]
    pub fn state(&self) -> Option<LocalMediaState> {
        self.stream.as_ref().map(|stream| LocalMediaState {
            stream: stream.clone(),
            video_enabled: Self::enabled(stream, TrackKind::Video),
            audio_enabled: Self::enabled(stream, TrackKind::Audio),
        })
    }

    #[must_use]
    pub fn video_enabled(&self) -> bool {
        self.stream
            .as_ref()
            .is_some_and(|stream| Self::enabled(stream, TrackKind::Video))
    }

    #[must_use]
    pub fn audio_enabled(&self) -> bool {
        self.stream
            .as_ref()
            .is_some_and(|stream| Self::enabled(stream, TrackKind::Audio))
    }

    /// Flip the camera track. Returns the new flag, `None` without a stream.
    pub fn toggle_video(&mut self) -> Option<bool> {
        self.toggle(TrackKind::Video)
    }

    /// Flip the microphone track. Returns the new flag, `None` without a stream.
    pub fn toggle_audio(&mut self) -> Option<bool> {
        self.toggle(TrackKind::Audio)
    }

    fn toggle(&mut self, kind: TrackKind) -> Option<bool> {
        let track = self.stream.as_ref()?.track(kind)?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        debug!(
            target: "room.media",
            track_id = %track.id(),
            kind = kind.as_str(),
            enabled,
            "Local track toggled"
        );
        Some(track.is_enabled())
    }

    /// Stop all tracks. Idempotent: returns `true` only on the call that
    /// actually stopped something.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;

        match self.stream.take() {
            Some(stream) => {
                stream.stop();
                info!(
                    target: "room.media",
                    stream_id = %stream.id(),
                    "Local media released"
                );
                true
            }
            None => false,
        }
    }

    fn enabled(stream: &MediaStream, kind: TrackKind) -> bool {
        stream.track(kind).is_some_and(|track| track.is_enabled())
    }
}
