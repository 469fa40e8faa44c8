//! Local media pipeline.
//!
//! Owns the local capture tracks and the camera/screen swap. Mute toggles
//! flip a shared atomic flag on the track; every peer link holds a clone of
//! the same track handle, so a toggle is visible everywhere without any
//! signaling traffic or track replacement.

use crate::errors::ClientError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use signal_protocol::MediaState;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

/// Error type for device acquisition.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Device missing or in use.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// User denied the permission prompt or cancelled the picker.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// Transport-level track identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(pub String);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Audio or video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Where a local track came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    Camera,
    Microphone,
    Screen,
}

struct TrackInner {
    id: TrackId,
    kind: TrackKind,
    source: TrackSource,
    enabled: AtomicBool,
}

/// A local capture track.
///
/// Cheap to clone; all clones share the enabled flag. Peer links read it,
/// only the pipeline writes it.
#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<TrackInner>,
}

impl LocalTrack {
    /// Create a new enabled track.
    pub fn new(id: TrackId, kind: TrackKind, source: TrackSource) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id,
                kind,
                source,
                enabled: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> &TrackId {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("source", &self.inner.source)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl PartialEq for LocalTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for LocalTrack {}

/// Out-of-band capture device events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// A screen track was ended outside the client (the user clicked the
    /// OS-level "stop sharing" control).
    ScreenEnded { track_id: TrackId },
}

/// Device acquisition capability.
///
/// Acquisition may block on a permission prompt, so every method is async
/// and the room actor never awaits one while holding up unrelated traffic.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Acquire the camera.
    ///
    /// # Errors
    ///
    /// Returns an error if no camera is available or permission is denied.
    async fn acquire_camera(&self) -> Result<LocalTrack, CaptureError>;

    /// Acquire the microphone.
    ///
    /// # Errors
    ///
    /// Returns an error if no microphone is available or permission is denied.
    async fn acquire_microphone(&self) -> Result<LocalTrack, CaptureError>;

    /// Acquire a screen capture track.
    ///
    /// # Errors
    ///
    /// Returns an error if the user cancels the picker or capture fails.
    async fn acquire_screen(&self) -> Result<LocalTrack, CaptureError>;

    /// Subscribe to device events. Each call returns a fresh receiver.
    fn events(&self) -> mpsc::Receiver<CaptureEvent>;
}

/// What the fallback chain settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaProfile {
    /// Camera and microphone.
    Full,
    /// Microphone only.
    AudioOnly,
    /// No devices; chat and receiving still work.
    ChatOnly,
}

/// Non-fatal degradation surfaced alongside the profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaWarning {
    CameraUnavailable(String),
    MicrophoneUnavailable(String),
}

/// Local media state owned by the room actor.
///
/// The pipeline holds tracks, not the capture device: screen acquisition
/// can block on a permission prompt, so the actor runs it off the event
/// loop and installs the result with [`MediaPipeline::set_screen_track`].
pub struct MediaPipeline {
    camera: Option<LocalTrack>,
    microphone: Option<LocalTrack>,
    screen: Option<LocalTrack>,
    profile: MediaProfile,
}

impl MediaPipeline {
    /// Acquire local devices, degrading through the fallback chain:
    /// camera+mic, then mic-only, then chat-only. Never fails; the floor
    /// is a pipeline with no tracks.
    pub async fn acquire(capture: &Arc<dyn MediaCapture>) -> (Self, Vec<MediaWarning>) {
        let mut warnings = Vec::new();

        let camera = match capture.acquire_camera().await {
            Ok(track) => Some(track),
            Err(e) => {
                warn!(target: "rc.media", error = %e, "camera unavailable, degrading");
                warnings.push(MediaWarning::CameraUnavailable(e.to_string()));
                None
            }
        };

        let microphone = match capture.acquire_microphone().await {
            Ok(track) => Some(track),
            Err(e) => {
                warn!(target: "rc.media", error = %e, "microphone unavailable, degrading");
                warnings.push(MediaWarning::MicrophoneUnavailable(e.to_string()));
                None
            }
        };

        let profile = match (&camera, &microphone) {
            (Some(_), Some(_)) => MediaProfile::Full,
            (None, Some(_)) => MediaProfile::AudioOnly,
            // A camera with no microphone still counts as Full for the
            // video path; the mic warning already went out.
            (Some(_), None) => MediaProfile::Full,
            (None, None) => MediaProfile::ChatOnly,
        };

        (
            Self {
                camera,
                microphone,
                screen: None,
                profile,
            },
            warnings,
        )
    }

    pub fn profile(&self) -> MediaProfile {
        self.profile
    }

    /// The video track peers should currently receive: the screen track
    /// while sharing, the camera otherwise.
    pub fn active_video(&self) -> Option<LocalTrack> {
        self.screen.clone().or_else(|| self.camera.clone())
    }

    /// Tracks to attach when opening a new peer link.
    pub fn local_tracks(&self) -> Vec<LocalTrack> {
        let mut tracks = Vec::new();
        if let Some(video) = self.active_video() {
            tracks.push(video);
        }
        if let Some(mic) = &self.microphone {
            tracks.push(mic.clone());
        }
        tracks
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    /// Advertised media flags, derived from the live tracks.
    pub fn media_state(&self) -> MediaState {
        MediaState {
            camera_on: self.camera.as_ref().is_some_and(LocalTrack::is_enabled),
            mic_on: self.microphone.as_ref().is_some_and(LocalTrack::is_enabled),
            screen_sharing: self.screen.is_some(),
        }
    }

    /// Flip the camera flag. Returns the new enabled state.
    ///
    /// # Errors
    ///
    /// Returns a recoverable error if no camera track exists.
    pub fn toggle_camera(&mut self) -> Result<bool, ClientError> {
        let track = self
            .camera
            .as_ref()
            .ok_or_else(|| ClientError::TrackUnavailable("camera".to_string()))?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        Ok(enabled)
    }

    /// Flip the microphone flag. Returns the new enabled state.
    ///
    /// # Errors
    ///
    /// Returns a recoverable error if no microphone track exists.
    pub fn toggle_microphone(&mut self) -> Result<bool, ClientError> {
        let track = self
            .microphone
            .as_ref()
            .ok_or_else(|| ClientError::TrackUnavailable("microphone".to_string()))?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        Ok(enabled)
    }

    /// Install an already-acquired screen track as the active video source.
    pub fn set_screen_track(&mut self, track: LocalTrack) {
        self.screen = Some(track);
    }

    /// Drop the screen track and restore the camera as the video source.
    ///
    /// Returns the restored camera track, if any. No-op when not sharing.
    pub fn stop_screen_share(&mut self) -> Option<LocalTrack> {
        self.screen.take()?;
        self.camera.clone()
    }

    /// True if this track id is the live screen track.
    pub fn is_current_screen(&self, track_id: &TrackId) -> bool {
        self.screen.as_ref().is_some_and(|t| t.id() == track_id)
    }

    /// Release every local track.
    pub fn release(&mut self) {
        self.camera = None;
        self.microphone = None;
        self.screen = None;
        self.profile = MediaProfile::ChatOnly;
    }
}
