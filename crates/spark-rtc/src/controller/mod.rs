//! Room controller: one participant's path through an event.
//!
//! `NotStarted → Searching → Connected → Searching | Terminated`. Starting
//! checks sign-in and ticket, asks for camera and microphone, then joins
//! the queue. While searching, a push subscription and a status poll race
//! to notice the match. Once matched, a peer session negotiates with the
//! partner; if the partner leaves or the session fails, the participant is
//! back in the queue with fresh media.
//!
//! The controller runs as its own task. [`RoomHandle`] sends it commands;
//! progress comes back as [`ControllerEvent`]s.

mod actor;
mod detector;
mod types;


use tokio::sync::{mpsc, oneshot, watch};

use spark_common::{Notification, SessionError};

use crate::media::TrackKind;
use actor::Controller;
use types::Command;

pub use detector::{first_match, Detection, Found, MatchSource};
pub use types::{ControllerConfig, ControllerEvent, Phase, Services};

/// Handle for driving a room controller. Dropping every clone leaves the
/// room and stops the controller.
#[derive(Clone)]
pub struct RoomHandle {
    commands: mpsc::Sender<Command>,
    phase: watch::Receiver<Phase>,
}

impl RoomHandle {
    /// Spawn a controller for `config.event_id`.
    /// Returns `(handle, event_receiver)`.
    pub fn spawn(
        config: ControllerConfig,
        services: Services,
    ) -> (Self, mpsc::Receiver<ControllerEvent>) {
        let (event_tx, event_rx) = mpsc::channel(512);
        let (command_tx, command_rx) = mpsc::channel(64);
        let (phase_tx, phase_rx) = watch::channel(Phase::NotStarted);
        let (acquired_tx, acquired_rx) = mpsc::unbounded_channel();

        let controller = Controller::new(config, services, event_tx, phase_tx, acquired_tx);
        tokio::spawn(controller.run(command_rx, acquired_rx));

        (
            Self {
                commands: command_tx,
                phase: phase_rx,
            },
            event_rx,
        )
    }

    /// Sign-in, ticket and media checks, then join the queue. Resolves once
    /// the participant is searching or a check failed. A start cancelled
    /// by [`leave`](Self::leave) resolves with `Ok`.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.request(Command::Start).await
    }

    /// Skip the current partner. No-op unless connected.
    pub async fn next(&self) -> Result<(), SessionError> {
        self.request(Command::Next).await
    }

    pub async fn leave(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Leave(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Returns whether video is now enabled.
    pub async fn toggle_video(&self) -> bool {
        self.toggle(TrackKind::Video).await
    }

    /// Returns whether audio is now enabled.
    pub async fn toggle_audio(&self) -> bool {
        self.toggle(TrackKind::Audio).await
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Wait until the controller reaches `phase`.
    pub async fn wait_for(&self, phase: Phase) {
        let mut rx = self.phase.clone();
        let _ = rx.wait_for(|p| *p == phase).await;
    }

    /// Notifications not yet expired, oldest first.
    pub async fn notifications(&self) -> Vec<Notification> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Notifications(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    async fn toggle(&self, kind: TrackKind) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Toggle(kind, tx)).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<(), SessionError>>) -> Command,
    ) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(command(tx)).await.is_err() {
            return Err(SessionError::SignalingFailure("room controller stopped".into()));
        }
        rx.await.unwrap_or(Ok(()))
    }
}
