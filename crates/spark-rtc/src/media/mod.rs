//! Local and remote media: tracks, streams, device acquisition and the
//! permission flow in front of it.

mod fake;
mod permission;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use spark_common::SessionError;
use spark_config::schema::MediaConfig;

pub use fake::FakeDevices;
pub use permission::{PermissionFlow, PermissionOutcome, PermissionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A handle to one media track. Clones share state, so disabling or
/// stopping through any clone is visible through all of them.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Mute/unmute without touching the session.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Release the underlying device. Irreversible.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    /// Enable or disable every track of `kind`. Returns whether one existed.
    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) -> bool {
        let mut found = false;
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
            found = true;
        }
        found
    }

    /// Stop every track, most recently acquired first.
    pub fn stop_all(&self) {
        for track in self.tracks.iter().rev() {
            track.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.tracks.iter().all(MediaTrack::is_stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl From<&MediaConfig> for MediaConstraints {
    fn from(config: &MediaConfig) -> Self {
        Self {
            video: config.video,
            audio: config.audio,
        }
    }
}

/// Camera/microphone access.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Ask for a local stream. Fails with `PermissionDenied`, `DeviceNotFound`,
    /// `DeviceBusy` or `TransportBlocked`.
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream, SessionError>;
}
