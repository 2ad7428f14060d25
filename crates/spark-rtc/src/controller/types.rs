//! Types, configuration, and events for the room controller.

use std::sync::Arc;
use std::time::Duration;

use spark_common::{EventId, Notification, ParticipantId, RoomId, SessionError};
use spark_config::schema::{MediaConfig, PeerConfig, SearchConfig};
use spark_config::SparkConfig;
use tokio::sync::oneshot;

use crate::identity::{IdentityService, TicketService};
use crate::media::{MediaDevices, MediaStream, PermissionState, TrackKind};
use crate::peer::{PeerConnectionFactory, PeerState, Role};
use crate::queue_api::{QueueApi, QueueSubscriber};
use crate::relay::SignalingRelay;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Where the participant is in the event's conversation flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    /// In the queue, waiting for a partner.
    Searching,
    /// Matched; a peer session is running (negotiating or live).
    Connected,
    Terminated,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub event_id: EventId,
    pub search: SearchConfig,
    pub peer: PeerConfig,
    pub media: MediaConfig,
}

impl ControllerConfig {
    pub fn new(event_id: EventId, config: &SparkConfig) -> Self {
        Self {
            event_id,
            search: config.search.clone(),
            peer: config.peer.clone(),
            media: config.media.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.search.poll_interval_ms)
    }
}

/// Everything the controller talks to.
#[derive(Clone)]
pub struct Services {
    pub queue: Arc<dyn QueueApi>,
    pub notices: Arc<dyn QueueSubscriber>,
    pub relay: Arc<dyn SignalingRelay>,
    pub connections: Arc<dyn PeerConnectionFactory>,
    pub devices: Arc<dyn MediaDevices>,
    pub identity: Arc<dyn IdentityService>,
    pub tickets: Arc<dyn TicketService>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    Phase(Phase),
    Permission(PermissionState),
    /// Local media is live and can be previewed.
    LocalStream(MediaStream),
    Matched {
        room_id: RoomId,
        partner: ParticipantId,
        role: Role,
    },
    Peer(PeerState),
    RemoteStream(MediaStream),
    /// The partner left or dropped; the participant is searching again.
    PartnerLeft { room_id: RoomId },
    MediaToggled { kind: TrackKind, enabled: bool },
    Notice(Notification),
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub(super) type Reply = oneshot::Sender<Result<(), SessionError>>;

#[derive(Debug)]
pub(super) enum Command {
    Start(Reply),
    Next(Reply),
    Leave(oneshot::Sender<()>),
    Toggle(TrackKind, oneshot::Sender<bool>),
    Notifications(oneshot::Sender<Vec<Notification>>),
}
