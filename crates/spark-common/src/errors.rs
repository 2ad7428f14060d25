use std::path::PathBuf;

use crate::id::EventId;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Failures a participant's session can run into, from media acquisition
/// through signaling and negotiation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("camera or microphone permission denied")]
    PermissionDenied,

    #[error("no camera or microphone found")]
    DeviceNotFound,

    #[error("camera or microphone is still in use by another session")]
    DeviceBusy,

    #[error("media access blocked by the host environment")]
    TransportBlocked,

    #[error("signaling failure: {0}")]
    SignalingFailure(String),

    #[error("negotiation failure: {0}")]
    NegotiationFailure(String),

    #[error("lost a pairing race")]
    QueueConflict,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("not signed in")]
    NotSignedIn,

    #[error("no ticket for event {0}")]
    NoTicket(EventId),
}

/// How a [`SessionError`] is handled once it reaches the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Shown to the user as-is.
    Surface,
    /// One automatic retry (ICE restart), then surfaced as a connection failure.
    RetryOnce,
    /// Never shown; re-read queue status and carry on.
    Reread,
}

impl SessionError {
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::SignalingFailure(_) | Self::NegotiationFailure(_) => Disposition::RetryOnce,
            Self::QueueConflict => Disposition::Reread,
            _ => Disposition::Surface,
        }
    }

    /// Text shown to the participant.
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied => {
                "Camera access was blocked. Allow camera and microphone in your browser settings, then try again.".into()
            }
            Self::DeviceNotFound => {
                "No camera or microphone was found. Connect a device and try again.".into()
            }
            Self::DeviceBusy => {
                "Your camera is being used by another tab or app. Close it and try again.".into()
            }
            Self::TransportBlocked => {
                "This page can't reach your camera here. Open the event in its own window.".into()
            }
            Self::SignalingFailure(_) | Self::NegotiationFailure(_) | Self::Timeout(_) => {
                "Connection failed. Try the next partner.".into()
            }
            Self::QueueConflict => "Looking for someone new...".into(),
            Self::NotSignedIn => "Sign in to join the conversation queue.".into(),
            Self::NoTicket(_) => "You need a ticket for this event to meet other attendees.".into(),
        }
    }
}

/// Errors from the server-side matching queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("unknown event: {0}")]
    UnknownEvent(EventId),

    #[error("participant is not in the queue")]
    NotInQueue,

    #[error("queue entry changed during commit")]
    Conflict,

    #[error("invalid room: {0}")]
    InvalidRoom(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SparkError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("{0}")]
    Other(String),
}
