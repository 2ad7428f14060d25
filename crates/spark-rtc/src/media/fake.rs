//! Scripted media devices.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use spark_common::SessionError;

use super::{MediaConstraints, MediaDevices, MediaStream, MediaTrack, TrackKind};

#[derive(Default)]
struct DeviceState {
    /// Failures returned by upcoming `acquire` calls, in order.
    script: VecDeque<SessionError>,
    issued: Vec<MediaTrack>,
    acquisitions: u32,
    delay: Option<Duration>,
}

/// Devices that hand out tracks and refuse a second owner while any
/// previously issued track is still live.
#[derive(Clone, Default)]
pub struct FakeDevices {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next `acquire` with `error`. Calls queue up.
    pub fn fail_next(&self, error: SessionError) {
        self.state().script.push_back(error);
    }

    /// Make every `acquire` wait before answering, like a pending prompt.
    pub fn set_prompt_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    /// Tracks issued and not yet stopped.
    pub fn live_tracks(&self) -> usize {
        self.state().issued.iter().filter(|t| !t.is_stopped()).count()
    }

    pub fn acquisitions(&self) -> u32 {
        self.state().acquisitions
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream, SessionError> {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(error) = state.script.pop_front() {
            return Err(error);
        }
        if state.issued.iter().any(|t| !t.is_stopped()) {
            return Err(SessionError::DeviceBusy);
        }
        if !constraints.audio && !constraints.video {
            return Err(SessionError::DeviceNotFound);
        }

        state.acquisitions += 1;
        let n = state.acquisitions;
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::new(format!("mic-{n}"), TrackKind::Audio));
        }
        if constraints.video {
            tracks.push(MediaTrack::new(format!("cam-{n}"), TrackKind::Video));
        }
        state.issued.retain(|t| !t.is_stopped());
        state.issued.extend(tracks.iter().cloned());
        Ok(MediaStream::new(format!("local-{n}"), tracks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AV: MediaConstraints = MediaConstraints {
        video: true,
        audio: true,
    };

    #[tokio::test]
    async fn second_owner_gets_device_busy_until_release() {
        let devices = FakeDevices::new();
        let first = devices.acquire(AV).await.unwrap();
        assert_eq!(devices.live_tracks(), 2);
        assert_eq!(devices.acquire(AV).await.unwrap_err(), SessionError::DeviceBusy);

        first.stop_all();
        assert_eq!(devices.live_tracks(), 0);
        assert!(devices.acquire(AV).await.is_ok());
    }

    #[tokio::test]
    async fn scripted_failures_come_first() {
        let devices = FakeDevices::new();
        devices.fail_next(SessionError::PermissionDenied);
        assert_eq!(
            devices.acquire(AV).await.unwrap_err(),
            SessionError::PermissionDenied
        );
        assert!(devices.acquire(AV).await.is_ok());
        assert_eq!(devices.acquisitions(), 1);
    }
}
