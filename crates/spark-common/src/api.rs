//! Request/response types for the matching queue API.
//!
//! These ride inside the server's `request`/`response` frames and are also
//! returned directly by in-process queue adapters.

use serde::{Deserialize, Serialize};

use crate::id::{EventId, ParticipantId, RoomId};

/// Where a participant stands in an event's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Matched,
    NotInQueue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub status: QueueStatus,
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: QueueStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    /// The other participant in `room_id`. Lets each side derive its
    /// signaling role without a second lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<ParticipantId>,
}

impl StatusResponse {
    pub fn not_in_queue() -> Self {
        Self {
            status: QueueStatus::NotInQueue,
            room_id: None,
            partner_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResponse {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_ids: Option<[ParticipantId; 2]>,
}

impl MatchResponse {
    pub fn unmatched() -> Self {
        Self {
            matched: false,
            room_id: None,
            participant_ids: None,
        }
    }
}

/// One queue operation. Also the key the client-side request cache uses
/// to collapse identical in-flight requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum QueueOp {
    Join { event_id: EventId },
    Leave { event_id: EventId },
    Status { event_id: EventId },
    NextMatch { event_id: EventId },
    TriggerMatch { event_id: EventId },
}

impl QueueOp {
    pub fn event_id(&self) -> &EventId {
        match self {
            Self::Join { event_id }
            | Self::Leave { event_id }
            | Self::Status { event_id }
            | Self::NextMatch { event_id }
            | Self::TriggerMatch { event_id } => event_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Status { .. } => "status",
            Self::NextMatch { .. } => "next_match",
            Self::TriggerMatch { .. } => "trigger_match",
        }
    }
}

/// Result body of a [`QueueOp`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "body", rename_all = "snake_case")]
pub enum QueueReply {
    Join(JoinResponse),
    Leave,
    Status(StatusResponse),
    NextMatch(MatchResponse),
    TriggerMatch(MatchResponse),
}

/// Push payload delivered when a participant's queue entry changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchNotice {
    pub is_matched: bool,
    pub current_room_id: Option<RoomId>,
}
