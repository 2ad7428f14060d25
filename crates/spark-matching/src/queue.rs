//! Per-event queue state. Plain synchronous data; the engine wraps each
//! event's queue in its own lock.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use spark_common::{
    new_id, EventId, JoinResponse, ParticipantId, QueueError, QueueStatus, RoomId, StatusResponse,
};

use crate::types::{
    EntryState, EventStats, LeaveOutcome, QueueChange, QueueEntry, Room, RoomState,
};

/// A waiting entry as read during a matching pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub participant: ParticipantId,
    pub version: u64,
}

pub(crate) struct EventQueue {
    event_id: EventId,
    /// One entry per participant. `Left` entries are tombstones.
    entries: HashMap<ParticipantId, QueueEntry>,
    /// Active rooms only.
    rooms: HashMap<RoomId, Room>,
    next_seq: u64,
    next_version: u64,
}

impl EventQueue {
    pub fn new(event_id: EventId) -> Self {
        Self {
            event_id,
            entries: HashMap::new(),
            rooms: HashMap::new(),
            next_seq: 0,
            next_version: 0,
        }
    }

    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn change(&self, participant: &ParticipantId, room: Option<&RoomId>) -> QueueChange {
        QueueChange {
            event_id: self.event_id.clone(),
            participant_id: participant.clone(),
            is_matched: room.is_some(),
            current_room_id: room.cloned(),
        }
    }

    pub fn entry(&self, participant: &ParticipantId) -> Option<&QueueEntry> {
        self.entries.get(participant)
    }

    /// Idempotent join. Returns the change to broadcast if an entry was created.
    pub fn join(&mut self, participant: &ParticipantId) -> (JoinResponse, Option<QueueChange>) {
        if let Some(entry) = self.entries.get(participant) {
            match entry.state {
                EntryState::Waiting => {
                    return (
                        JoinResponse {
                            status: QueueStatus::Waiting,
                            matched: false,
                            room_id: None,
                        },
                        None,
                    );
                }
                EntryState::Matched => {
                    return (
                        JoinResponse {
                            status: QueueStatus::Matched,
                            matched: true,
                            room_id: entry.room_id.clone(),
                        },
                        None,
                    );
                }
                EntryState::Left => {}
            }
        }

        let version = self.bump_version();
        let seq = self.next_seq;
        self.next_seq += 1;
        let now = Utc::now();
        self.entries.insert(
            participant.clone(),
            QueueEntry {
                id: new_id(),
                event_id: self.event_id.clone(),
                participant_id: participant.clone(),
                state: EntryState::Waiting,
                matched_with: None,
                room_id: None,
                joined_at: now,
                waiting_since: now,
                seq,
                version,
            },
        );

        (
            JoinResponse {
                status: QueueStatus::Waiting,
                matched: false,
                room_id: None,
            },
            Some(self.change(participant, None)),
        )
    }

    pub fn status(&self, participant: &ParticipantId) -> StatusResponse {
        match self.entries.get(participant) {
            Some(entry) if entry.state == EntryState::Matched => StatusResponse {
                status: QueueStatus::Matched,
                room_id: entry.room_id.clone(),
                partner_id: entry.matched_with.clone(),
            },
            Some(entry) => StatusResponse {
                status: entry.status(),
                room_id: None,
                partner_id: None,
            },
            None => StatusResponse::not_in_queue(),
        }
    }

    /// The two oldest waiting participants, in join order.
    pub fn oldest_waiting_pair(&self) -> Option<[Candidate; 2]> {
        let mut waiting: Vec<&QueueEntry> = self
            .entries
            .values()
            .filter(|e| e.state == EntryState::Waiting)
            .collect();
        if waiting.len() < 2 {
            return None;
        }
        waiting.sort_by_key(|e| e.seq);
        let pick = |e: &QueueEntry| Candidate {
            participant: e.participant_id.clone(),
            version: e.version,
        };
        Some([pick(waiting[0]), pick(waiting[1])])
    }

    fn still_waiting(&self, candidate: &Candidate) -> bool {
        self.entries
            .get(&candidate.participant)
            .is_some_and(|e| e.state == EntryState::Waiting && e.version == candidate.version)
    }

    /// Pair two candidates read earlier, provided neither entry has been
    /// written since.
    pub fn commit_pair(
        &mut self,
        pair: &[Candidate; 2],
    ) -> Result<(Room, [QueueChange; 2]), QueueError> {
        let [a, b] = pair;
        if a.participant == b.participant || !self.still_waiting(a) || !self.still_waiting(b) {
            return Err(QueueError::Conflict);
        }

        let room = Room {
            id: RoomId::generate(),
            event_id: self.event_id.clone(),
            participant_ids: [a.participant.clone(), b.participant.clone()],
            state: RoomState::Active,
            created_at: Utc::now(),
        };

        for (me, partner) in [(a, b), (b, a)] {
            let version = self.bump_version();
            if let Some(entry) = self.entries.get_mut(&me.participant) {
                entry.state = EntryState::Matched;
                entry.matched_with = Some(partner.participant.clone());
                entry.room_id = Some(room.id.clone());
                entry.version = version;
            }
        }
        self.rooms.insert(room.id.clone(), room.clone());

        let changes = [
            self.change(&a.participant, Some(&room.id)),
            self.change(&b.participant, Some(&room.id)),
        ];
        Ok((room, changes))
    }

    /// Remove a participant. A matched participant's room is ended and the
    /// ex-partner goes back to waiting, keeping its place in line but starting
    /// a fresh wait for the reaper.
    pub fn leave(&mut self, participant: &ParticipantId) -> (LeaveOutcome, Vec<QueueChange>) {
        let mut outcome = LeaveOutcome::default();
        let mut changes = Vec::new();

        let Some(entry) = self.entries.get(participant) else {
            return (outcome, changes);
        };
        if entry.state == EntryState::Left {
            return (outcome, changes);
        }
        let room_id = entry.room_id.clone();
        let partner = entry.matched_with.clone();

        let version = self.bump_version();
        if let Some(entry) = self.entries.get_mut(participant) {
            entry.state = EntryState::Left;
            entry.matched_with = None;
            entry.room_id = None;
            entry.version = version;
        }
        outcome.was_queued = true;
        changes.push(self.change(participant, None));

        if let Some(mut room) = room_id.and_then(|id| self.rooms.remove(&id)) {
            room.state = RoomState::Ended;
            outcome.ended_room = Some(room);
        }

        if let Some(partner) = partner {
            let version = self.bump_version();
            if let Some(p) = self.entries.get_mut(&partner) {
                if p.state == EntryState::Matched {
                    p.state = EntryState::Waiting;
                    p.matched_with = None;
                    p.room_id = None;
                    p.waiting_since = Utc::now();
                    p.version = version;
                    outcome.requeued = Some(partner.clone());
                    changes.push(self.change(&partner, None));
                }
            }
        }

        (outcome, changes)
    }

    /// Drop entries waiting since before `cutoff`, plus old tombstones.
    pub fn reap_waiting_before(&mut self, cutoff: DateTime<Utc>) -> Vec<QueueChange> {
        let stale: Vec<ParticipantId> = self
            .entries
            .values()
            .filter(|e| e.state != EntryState::Matched && e.waiting_since < cutoff)
            .map(|e| e.participant_id.clone())
            .collect();

        let mut changes = Vec::new();
        for participant in stale {
            if let Some(entry) = self.entries.remove(&participant) {
                if entry.state == EntryState::Waiting {
                    changes.push(self.change(&participant, None));
                }
            }
        }
        changes
    }

    pub fn stats(&self) -> EventStats {
        EventStats {
            waiting: self
                .entries
                .values()
                .filter(|e| e.state == EntryState::Waiting)
                .count(),
            active_rooms: self.rooms.len(),
        }
    }

    pub fn room(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn active_rooms(&self) -> Vec<Room> {
        self.rooms.values().cloned().collect()
    }

    /// Participants with a live (waiting or matched) entry.
    pub fn is_queued(&self, participant: &ParticipantId) -> bool {
        self.entries
            .get(participant)
            .is_some_and(|e| e.state != EntryState::Left)
    }
}
