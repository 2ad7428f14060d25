//! Events, commands and subscription routes for the gateway client.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use spark_common::{ClientFrame, EventId, MatchNotice, QueueReply, SessionError};
use tokio::sync::{mpsc, oneshot};

use crate::protocol::SignalingMessage;

// ---------------------------------------------------------------------------
// Events & Commands
// ---------------------------------------------------------------------------

/// Connection-level events emitted by the gateway client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// WebSocket connection established and hello sent.
    Connected,
    /// WebSocket connection lost; a reconnect is scheduled.
    Disconnected,
    /// The server reported an error, or the connection attempt failed.
    Error(String),
}

#[derive(Debug)]
pub(crate) enum GatewayCommand {
    Send(ClientFrame),
    /// Close the socket and stop reconnecting.
    Disconnect,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub(crate) type PendingReply = oneshot::Sender<Result<QueueReply, SessionError>>;

/// Where incoming frames go: request waiters by correlation id, and local
/// subscribers by channel and by event. Also the set of server-side
/// subscriptions to restore after a reconnect.
#[derive(Default)]
pub(crate) struct Routes {
    pub(crate) pending: HashMap<String, PendingReply>,
    channels: HashMap<String, HashMap<u64, mpsc::UnboundedSender<SignalingMessage>>>,
    queues: HashMap<EventId, HashMap<u64, mpsc::UnboundedSender<MatchNotice>>>,
    next_key: u64,
}

impl Routes {
    fn key(&mut self) -> u64 {
        self.next_key += 1;
        self.next_key
    }

    /// Returns the subscriber key and whether it is the channel's first.
    pub(crate) fn add_channel(
        &mut self,
        channel: &str,
        tx: mpsc::UnboundedSender<SignalingMessage>,
    ) -> (u64, bool) {
        let key = self.key();
        let subs = self.channels.entry(channel.to_string()).or_default();
        subs.insert(key, tx);
        (key, subs.len() == 1)
    }

    /// Returns whether the channel has no subscribers left.
    pub(crate) fn remove_channel(&mut self, channel: &str, key: u64) -> bool {
        let Some(subs) = self.channels.get_mut(channel) else {
            return false;
        };
        subs.remove(&key);
        if subs.is_empty() {
            self.channels.remove(channel);
            true
        } else {
            false
        }
    }

    pub(crate) fn add_queue(
        &mut self,
        event_id: &EventId,
        tx: mpsc::UnboundedSender<MatchNotice>,
    ) -> (u64, bool) {
        let key = self.key();
        let subs = self.queues.entry(event_id.clone()).or_default();
        subs.insert(key, tx);
        (key, subs.len() == 1)
    }

    pub(crate) fn remove_queue(&mut self, event_id: &EventId, key: u64) -> bool {
        let Some(subs) = self.queues.get_mut(event_id) else {
            return false;
        };
        subs.remove(&key);
        if subs.is_empty() {
            self.queues.remove(event_id);
            true
        } else {
            false
        }
    }

    /// Deliver to every subscriber of `channel`. Returns how many got it.
    pub(crate) fn deliver_signal(&mut self, channel: &str, message: &SignalingMessage) -> usize {
        let Some(subs) = self.channels.get_mut(channel) else {
            return 0;
        };
        subs.retain(|_, tx| tx.send(message.clone()).is_ok());
        subs.len()
    }

    pub(crate) fn deliver_notice(&mut self, event_id: &EventId, notice: &MatchNotice) -> usize {
        let Some(subs) = self.queues.get_mut(event_id) else {
            return 0;
        };
        subs.retain(|_, tx| tx.send(notice.clone()).is_ok());
        subs.len()
    }

    /// Frames that re-establish every server-side subscription.
    pub(crate) fn resubscribe_frames(&self) -> Vec<ClientFrame> {
        let channels = self.channels.keys().map(|channel| ClientFrame::JoinChannel {
            channel: channel.clone(),
            self_send: false,
        });
        let queues = self.queues.keys().map(|event_id| ClientFrame::SubscribeQueue {
            event_id: event_id.clone(),
        });
        channels.chain(queues).collect()
    }

    /// Requests in flight when the socket dropped will never be answered.
    pub(crate) fn fail_pending(&mut self, reason: &str) {
        for (_, waiter) in self.pending.drain() {
            let _ = waiter.send(Err(SessionError::SignalingFailure(reason.to_string())));
        }
    }
}

pub(crate) fn lock(routes: &Mutex<Routes>) -> MutexGuard<'_, Routes> {
    routes.lock().unwrap_or_else(|e| e.into_inner())
}
