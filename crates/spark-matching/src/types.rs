//! Queue entries, rooms, and the notifications emitted when they change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spark_common::{EventId, ParticipantId, QueueStatus, RoomId};
use spark_config::schema::MatchingConfig;

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Waiting,
    Matched,
    Left,
}

/// A participant's place in one event's queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub event_id: EventId,
    pub participant_id: ParticipantId,
    pub state: EntryState,
    pub matched_with: Option<ParticipantId>,
    pub room_id: Option<RoomId>,
    pub joined_at: DateTime<Utc>,
    /// Last time the entry entered `waiting`. Reset when a partner leaves;
    /// the reaper ages entries on this, not on `joined_at`.
    pub waiting_since: DateTime<Utc>,
    /// Join order within the event; FIFO selection sorts on this.
    pub seq: u64,
    /// Bumped on every write. Commits compare against the version read.
    pub version: u64,
}

impl QueueEntry {
    pub fn status(&self) -> QueueStatus {
        match self.state {
            EntryState::Waiting => QueueStatus::Waiting,
            EntryState::Matched => QueueStatus::Matched,
            EntryState::Left => QueueStatus::NotInQueue,
        }
    }
}

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Active,
    Ended,
}

/// The pairing of exactly two distinct participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub event_id: EventId,
    pub participant_ids: [ParticipantId; 2],
    pub state: RoomState,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn contains(&self, participant: &ParticipantId) -> bool {
        self.participant_ids.contains(participant)
    }

    /// The other participant, if `participant` is in this room.
    pub fn partner_of(&self, participant: &ParticipantId) -> Option<&ParticipantId> {
        match &self.participant_ids {
            [a, b] if a == participant => Some(b),
            [a, b] if b == participant => Some(a),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes & notifications
// ---------------------------------------------------------------------------

/// What a `leave` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub was_queued: bool,
    /// The room this leave ended, in its final `Ended` state.
    pub ended_room: Option<Room>,
    /// Ex-partner returned to `waiting`.
    pub requeued: Option<ParticipantId>,
}

/// Emitted on every queue-entry mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueChange {
    pub event_id: EventId,
    pub participant_id: ParticipantId,
    pub is_matched: bool,
    pub current_room_id: Option<RoomId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStats {
    pub waiting: usize,
    pub active_rooms: usize,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_commit_attempts: u32,
    pub notification_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&MatchingConfig::default())
    }
}

impl From<&MatchingConfig> for EngineConfig {
    fn from(config: &MatchingConfig) -> Self {
        Self {
            max_commit_attempts: config.max_commit_attempts.max(1),
            notification_capacity: config.notification_capacity as usize,
        }
    }
}
