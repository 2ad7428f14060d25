//! The matching engine: one queue per event, each behind its own lock.
//!
//! Writes to an event's queue are serialized by that queue's lock. A
//! matching pass reads a snapshot under the read lock and commits under the
//! write lock only if the selected entries still carry the versions it read;
//! a stale snapshot is re-read rather than overwritten.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use spark_common::{
    EventId, JoinResponse, MatchResponse, ParticipantId, QueueOp, QueueReply, QueueStatus, RoomId,
    StatusResponse,
};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::queue::EventQueue;
use crate::types::{EngineConfig, EventStats, LeaveOutcome, QueueChange, QueueEntry, Room};

type SharedQueue = Arc<RwLock<EventQueue>>;

pub struct MatchingEngine {
    config: EngineConfig,
    events: RwLock<HashMap<EventId, SharedQueue>>,
    /// room_id → event_id for active rooms.
    room_index: RwLock<HashMap<RoomId, EventId>>,
    changes: broadcast::Sender<QueueChange>,
}

impl MatchingEngine {
    pub fn new(config: EngineConfig) -> Self {
        let (changes, _) = broadcast::channel(config.notification_capacity.max(16));
        Self {
            config,
            events: RwLock::new(HashMap::new()),
            room_index: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Receive every queue-entry change across all events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueChange> {
        self.changes.subscribe()
    }

    async fn queue(&self, event_id: &EventId) -> Option<SharedQueue> {
        self.events.read().await.get(event_id).cloned()
    }

    async fn queue_or_create(&self, event_id: &EventId) -> SharedQueue {
        if let Some(queue) = self.queue(event_id).await {
            return queue;
        }
        let mut events = self.events.write().await;
        Arc::clone(
            events
                .entry(event_id.clone())
                .or_insert_with(|| Arc::new(RwLock::new(EventQueue::new(event_id.clone())))),
        )
    }

    fn publish(&self, changes: impl IntoIterator<Item = QueueChange>) {
        for change in changes {
            // No subscribers is fine.
            let _ = self.changes.send(change);
        }
    }

    /// Join an event's queue. Idempotent: a waiting participant stays put and
    /// a matched participant gets its current room back.
    pub async fn join(&self, event_id: &EventId, participant: &ParticipantId) -> JoinResponse {
        let queue = self.queue_or_create(event_id).await;
        let (response, change) = queue.write().await.join(participant);
        if let Some(change) = change {
            debug!(event_id = %event_id, participant = %participant, "Joined queue");
            self.publish([change]);
        }
        response
    }

    /// Pair the two oldest waiting participants of an event, if there are two.
    pub async fn try_match(&self, event_id: &EventId) -> Option<Room> {
        let queue = self.queue(event_id).await?;

        for attempt in 1..=self.config.max_commit_attempts {
            let pair = queue.read().await.oldest_waiting_pair()?;
            let mut guard = queue.write().await;
            match guard.commit_pair(&pair) {
                Ok((room, changes)) => {
                    // Indexed under the queue lock so a racing leave sees it.
                    self.room_index
                        .write()
                        .await
                        .insert(room.id.clone(), event_id.clone());
                    drop(guard);
                    self.publish(changes);
                    info!(
                        event_id = %event_id,
                        room_id = %room.id,
                        a = %room.participant_ids[0],
                        b = %room.participant_ids[1],
                        "Participants paired"
                    );
                    return Some(room);
                }
                Err(e) => {
                    debug!(event_id = %event_id, attempt, error = %e, "Pairing snapshot went stale");
                }
            }
        }

        warn!(
            event_id = %event_id,
            attempts = self.config.max_commit_attempts,
            "Matching pass gave up after repeated conflicts"
        );
        None
    }

    pub async fn status(&self, event_id: &EventId, participant: &ParticipantId) -> StatusResponse {
        match self.queue(event_id).await {
            Some(queue) => queue.read().await.status(participant),
            None => StatusResponse::not_in_queue(),
        }
    }

    /// Leave an event's queue, ending the room if matched.
    pub async fn leave(&self, event_id: &EventId, participant: &ParticipantId) -> LeaveOutcome {
        let Some(queue) = self.queue(event_id).await else {
            return LeaveOutcome::default();
        };
        let mut guard = queue.write().await;
        let (outcome, changes) = guard.leave(participant);
        if let Some(room) = &outcome.ended_room {
            self.room_index.write().await.remove(&room.id);
        }
        drop(guard);

        if let Some(room) = &outcome.ended_room {
            info!(
                event_id = %event_id,
                room_id = %room.id,
                participant = %participant,
                requeued = ?outcome.requeued.as_ref().map(|p| p.as_str()),
                "Room ended"
            );
        } else if outcome.was_queued {
            debug!(event_id = %event_id, participant = %participant, "Left queue");
        }
        self.publish(changes);
        outcome
    }

    /// Leave the current room (if any), rejoin, and run a matching pass.
    pub async fn next_match(&self, event_id: &EventId, participant: &ParticipantId) -> MatchResponse {
        self.leave(event_id, participant).await;
        self.join(event_id, participant).await;
        self.try_match(event_id).await;

        let status = self.status(event_id, participant).await;
        match (status.status, status.room_id) {
            (QueueStatus::Matched, Some(room_id)) => {
                let participant_ids = self.room(&room_id).await.map(|r| r.participant_ids);
                MatchResponse {
                    matched: true,
                    room_id: Some(room_id),
                    participant_ids,
                }
            }
            _ => MatchResponse::unmatched(),
        }
    }

    /// Force a matching pass and report the pairing it made.
    pub async fn trigger_match(&self, event_id: &EventId) -> MatchResponse {
        match self.try_match(event_id).await {
            Some(room) => MatchResponse {
                matched: true,
                room_id: Some(room.id),
                participant_ids: Some(room.participant_ids),
            },
            None => MatchResponse::unmatched(),
        }
    }

    /// Run one queue operation on behalf of `participant`.
    pub async fn execute(&self, participant: &ParticipantId, op: &QueueOp) -> QueueReply {
        match op {
            QueueOp::Join { event_id } => {
                let response = self.join(event_id, participant).await;
                QueueReply::Join(response)
            }
            QueueOp::Leave { event_id } => {
                self.leave(event_id, participant).await;
                QueueReply::Leave
            }
            QueueOp::Status { event_id } => QueueReply::Status(self.status(event_id, participant).await),
            QueueOp::NextMatch { event_id } => {
                QueueReply::NextMatch(self.next_match(event_id, participant).await)
            }
            QueueOp::TriggerMatch { event_id } => {
                QueueReply::TriggerMatch(self.trigger_match(event_id).await)
            }
        }
    }

    /// Leave every event the participant is queued in. Used when a
    /// connection drops without saying goodbye.
    pub async fn leave_everywhere(&self, participant: &ParticipantId) -> Vec<(EventId, LeaveOutcome)> {
        let queues: Vec<(EventId, SharedQueue)> = self
            .events
            .read()
            .await
            .iter()
            .map(|(id, q)| (id.clone(), Arc::clone(q)))
            .collect();

        let mut left = Vec::new();
        for (event_id, queue) in queues {
            if queue.read().await.is_queued(participant) {
                let outcome = self.leave(&event_id, participant).await;
                left.push((event_id, outcome));
            }
        }
        left
    }

    /// Remove entries that have been waiting longer than `max_age`. Returns
    /// how many were dropped.
    pub async fn reap_stale(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let cutoff = Utc::now() - max_age;
        let queues: Vec<SharedQueue> = self.events.read().await.values().cloned().collect();

        let mut reaped = 0;
        for queue in queues {
            let changes = queue.write().await.reap_waiting_before(cutoff);
            for change in &changes {
                info!(
                    event_id = %change.event_id,
                    participant = %change.participant_id,
                    "Reaping stale queue entry"
                );
            }
            reaped += changes.len();
            self.publish(changes);
        }
        reaped
    }

    /// Snapshot of an active room.
    pub async fn room(&self, room_id: &RoomId) -> Option<Room> {
        let event_id = self.room_index.read().await.get(room_id).cloned()?;
        let queue = self.queue(&event_id).await?;
        let room = queue.read().await.room(room_id).cloned();
        room
    }

    pub async fn active_rooms(&self, event_id: &EventId) -> Vec<Room> {
        match self.queue(event_id).await {
            Some(queue) => queue.read().await.active_rooms(),
            None => Vec::new(),
        }
    }

    pub async fn entry(&self, event_id: &EventId, participant: &ParticipantId) -> Option<QueueEntry> {
        let queue = self.queue(event_id).await?;
        let entry = queue.read().await.entry(participant).cloned();
        entry
    }

    pub async fn stats(&self, event_id: &EventId) -> EventStats {
        match self.queue(event_id).await {
            Some(queue) => queue.read().await.stats(),
            None => EventStats::default(),
        }
    }
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests;
