//! Match detection while searching: a push subscription and a status poll
//! race, the first to report a match wins and the other is dropped. The poll
//! also notices when the queue has lost the participant altogether.

use std::time::Duration;

use spark_common::{EventId, MatchNotice, QueueStatus, RoomId};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::queue_api::QueueApi;
use crate::subscription::Subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Push,
    Poll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Found {
    Matched(RoomId),
    /// The queue no longer holds the participant (reaped, or removed by
    /// another connection). The search cannot end on its own from here.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub found: Found,
    pub source: MatchSource,
}

async fn watch_push(notices: &mut Subscription<MatchNotice>) -> Found {
    loop {
        match notices.recv().await {
            Some(MatchNotice {
                is_matched: true,
                current_room_id: Some(room_id),
            }) => return Found::Matched(room_id),
            Some(_) => continue,
            // Push is best-effort; the poll keeps going.
            None => std::future::pending::<()>().await,
        }
    }
}

async fn poll_status(queue: &dyn QueueApi, event_id: &EventId, every: Duration) -> Found {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match queue.status(event_id).await {
            Ok(status) => match (status.status, status.room_id) {
                (QueueStatus::Matched, Some(room_id)) => return Found::Matched(room_id),
                (QueueStatus::NotInQueue, _) => return Found::Dropped,
                _ => {}
            },
            Err(e) => warn!(event_id = %event_id, error = %e, "Status poll failed"),
        }
    }
}

/// Wait for the first of push or poll to report a match, or for the poll to
/// find the participant gone from the queue. Returns `None` once `cancel`
/// fires.
pub async fn first_match(
    queue: &dyn QueueApi,
    notices: &mut Subscription<MatchNotice>,
    event_id: &EventId,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Option<Detection> {
    let detection = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        found = watch_push(notices) => Some(Detection { found, source: MatchSource::Push }),
        found = poll_status(queue, event_id, poll_interval) => Some(Detection { found, source: MatchSource::Poll }),
    };
    match &detection {
        Some(Detection { found: Found::Matched(room_id), source }) => {
            debug!(event_id = %event_id, room_id = %room_id, source = ?source, "Match detected");
        }
        Some(Detection { found: Found::Dropped, .. }) => {
            debug!(event_id = %event_id, "No longer in the queue");
        }
        None => {}
    }
    detection
}
