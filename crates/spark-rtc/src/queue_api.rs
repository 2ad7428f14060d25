//! Client-side seams to the matching queue: the request/response API and
//! the push subscription.

use std::sync::Arc;

use async_trait::async_trait;
use spark_common::{
    EventId, JoinResponse, MatchNotice, MatchResponse, ParticipantId, QueueOp, QueueReply,
    SessionError, StatusResponse,
};
use spark_matching::MatchingEngine;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::subscription::Subscription;

/// Queue API as seen by one participant. Implementations know who is calling.
#[async_trait]
pub trait QueueApi: Send + Sync {
    async fn call(&self, op: QueueOp) -> Result<QueueReply, SessionError>;

    async fn join(&self, event_id: &EventId) -> Result<JoinResponse, SessionError> {
        match self.call(QueueOp::Join { event_id: event_id.clone() }).await? {
            QueueReply::Join(r) => Ok(r),
            other => Err(unexpected("join", &other)),
        }
    }

    async fn leave(&self, event_id: &EventId) -> Result<(), SessionError> {
        match self.call(QueueOp::Leave { event_id: event_id.clone() }).await? {
            QueueReply::Leave => Ok(()),
            other => Err(unexpected("leave", &other)),
        }
    }

    async fn status(&self, event_id: &EventId) -> Result<StatusResponse, SessionError> {
        match self.call(QueueOp::Status { event_id: event_id.clone() }).await? {
            QueueReply::Status(r) => Ok(r),
            other => Err(unexpected("status", &other)),
        }
    }

    async fn next_match(&self, event_id: &EventId) -> Result<MatchResponse, SessionError> {
        match self.call(QueueOp::NextMatch { event_id: event_id.clone() }).await? {
            QueueReply::NextMatch(r) => Ok(r),
            other => Err(unexpected("next_match", &other)),
        }
    }

    async fn trigger_match(&self, event_id: &EventId) -> Result<MatchResponse, SessionError> {
        match self.call(QueueOp::TriggerMatch { event_id: event_id.clone() }).await? {
            QueueReply::TriggerMatch(r) => Ok(r),
            other => Err(unexpected("trigger_match", &other)),
        }
    }
}

fn unexpected(op: &str, reply: &QueueReply) -> SessionError {
    SessionError::SignalingFailure(format!("unexpected reply to {op}: {reply:?}"))
}

/// Push notifications for one participant's queue entry.
#[async_trait]
pub trait QueueSubscriber: Send + Sync {
    async fn subscribe(
        &self,
        event_id: &EventId,
        participant: &ParticipantId,
    ) -> Result<Subscription<MatchNotice>, SessionError>;
}

// ---------------------------------------------------------------------------
// In-process adapter
// ---------------------------------------------------------------------------

/// Queue API and push subscription served directly by a [`MatchingEngine`].
#[derive(Clone)]
pub struct LocalQueue {
    engine: Arc<MatchingEngine>,
    participant: ParticipantId,
}

impl LocalQueue {
    pub fn new(engine: Arc<MatchingEngine>, participant: ParticipantId) -> Self {
        Self {
            engine,
            participant,
        }
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }
}

#[async_trait]
impl QueueApi for LocalQueue {
    async fn call(&self, op: QueueOp) -> Result<QueueReply, SessionError> {
        Ok(self.engine.execute(&self.participant, &op).await)
    }
}

#[async_trait]
impl QueueSubscriber for LocalQueue {
    async fn subscribe(
        &self,
        event_id: &EventId,
        participant: &ParticipantId,
    ) -> Result<Subscription<MatchNotice>, SessionError> {
        let mut changes = self.engine.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let event_id = event_id.clone();
        let participant = participant.clone();

        let forwarder = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if change.event_id != event_id || change.participant_id != participant {
                            continue;
                        }
                        let notice = MatchNotice {
                            is_matched: change.is_matched,
                            current_room_id: change.current_room_id,
                        };
                        if tx.send(notice).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Queue change feed lagged; polling will catch up");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(participant = %participant, "Queue subscription forwarder stopped");
        });

        Ok(Subscription::new(rx, move || forwarder.abort()))
    }
}
