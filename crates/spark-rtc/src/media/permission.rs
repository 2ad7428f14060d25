//! Camera/microphone permission as an explicit state machine:
//! `Prompt → Requesting → Granted | Denied → (retry) Requesting`.

use spark_common::SessionError;
use tracing::debug;

use super::MediaStream;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionState {
    /// Nothing asked yet, or the last request was cancelled.
    Prompt,
    Requesting { attempt: u32 },
    Granted,
    Denied(SessionError),
}

/// How a finished request was applied.
#[derive(Debug)]
pub enum PermissionOutcome {
    Granted(MediaStream),
    Denied(SessionError),
    /// The request was cancelled or superseded; any stream it produced has
    /// already been stopped.
    Discarded,
}

#[derive(Debug)]
pub struct PermissionFlow {
    state: PermissionState,
    attempts: u32,
}

impl PermissionFlow {
    pub fn new() -> Self {
        Self {
            state: PermissionState::Prompt,
            attempts: 0,
        }
    }

    pub fn state(&self) -> &PermissionState {
        &self.state
    }

    pub fn is_requesting(&self) -> bool {
        matches!(self.state, PermissionState::Requesting { .. })
    }

    /// Start a request from `Prompt` or retry from `Denied`. Returns the
    /// attempt number to hand back to [`resolve`](Self::resolve), or `None`
    /// if a request is already running or permission was granted.
    pub fn begin(&mut self) -> Option<u32> {
        match self.state {
            PermissionState::Prompt | PermissionState::Denied(_) => {
                self.attempts += 1;
                self.state = PermissionState::Requesting {
                    attempt: self.attempts,
                };
                debug!(attempt = self.attempts, "Requesting media permission");
                Some(self.attempts)
            }
            PermissionState::Requesting { .. } | PermissionState::Granted => None,
        }
    }

    /// Apply the result of request `attempt`. Results for a cancelled or
    /// superseded attempt are discarded and their tracks stopped.
    pub fn resolve(
        &mut self,
        attempt: u32,
        result: Result<MediaStream, SessionError>,
    ) -> PermissionOutcome {
        let current = matches!(self.state, PermissionState::Requesting { attempt: a } if a == attempt);
        if !current {
            if let Ok(stream) = result {
                stream.stop_all();
            }
            debug!(attempt, "Discarding stale media permission result");
            return PermissionOutcome::Discarded;
        }

        match result {
            Ok(stream) => {
                self.state = PermissionState::Granted;
                PermissionOutcome::Granted(stream)
            }
            Err(e) => {
                self.state = PermissionState::Denied(e.clone());
                PermissionOutcome::Denied(e)
            }
        }
    }

    /// Abandon an outstanding request. The eventual result is discarded.
    pub fn cancel(&mut self) {
        if self.is_requesting() {
            self.state = PermissionState::Prompt;
        }
    }

    /// Back to `Prompt` once the granted media has been released, so the
    /// next session asks again.
    pub fn release(&mut self) {
        if self.state == PermissionState::Granted {
            self.state = PermissionState::Prompt;
        }
    }
}

impl Default for PermissionFlow {
    fn default() -> Self {
        Self::new()
    }
}
