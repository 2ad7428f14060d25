//! In-process relay with fault injection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use spark_common::SessionError;
use tokio::sync::mpsc;
use tracing::debug;

use super::SignalingRelay;
use crate::protocol::SignalingMessage;
use crate::subscription::Subscription;

type Matcher = Box<dyn Fn(&SignalingMessage) -> bool + Send>;

#[derive(Default)]
struct RelayState {
    channels: HashMap<String, HashMap<u64, mpsc::UnboundedSender<SignalingMessage>>>,
    next_subscriber: u64,
    /// Each matcher drops the first message it matches.
    drops: Vec<Matcher>,
    /// Each matcher holds back the first message it matches until the next
    /// publish on the same channel.
    holds: Vec<Matcher>,
    held: Vec<(String, SignalingMessage)>,
    failing: bool,
    published: Vec<SignalingMessage>,
}

impl RelayState {
    fn deliver(&mut self, channel: &str, message: &SignalingMessage) -> usize {
        let Some(subscribers) = self.channels.get_mut(channel) else {
            return 0;
        };
        subscribers.retain(|_, tx| tx.send(message.clone()).is_ok());
        subscribers.len()
    }

    fn take_first_match(matchers: &mut Vec<Matcher>, message: &SignalingMessage) -> bool {
        match matchers.iter().position(|m| m(message)) {
            Some(i) => {
                matchers.remove(i);
                true
            }
            None => false,
        }
    }
}

/// A relay living in the current process, shared by cloning.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Silently drop the next message matching `matcher`.
    pub fn drop_next(&self, matcher: impl Fn(&SignalingMessage) -> bool + Send + 'static) {
        self.state().drops.push(Box::new(matcher));
    }

    /// Hold back the next message matching `matcher` and deliver it after the
    /// following publish on the same channel.
    pub fn hold_next(&self, matcher: impl Fn(&SignalingMessage) -> bool + Send + 'static) {
        self.state().holds.push(Box::new(matcher));
    }

    /// Make every publish fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state()
            .channels
            .get(channel)
            .map_or(0, |subs| subs.values().filter(|tx| !tx.is_closed()).count())
    }

    /// Every message accepted for publishing, dropped ones included.
    pub fn published(&self) -> Vec<SignalingMessage> {
        self.state().published.clone()
    }
}

#[async_trait]
impl SignalingRelay for MemoryRelay {
    async fn subscribe(&self, channel: &str) -> Result<Subscription<SignalingMessage>, SessionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state();
            let id = state.next_subscriber;
            state.next_subscriber += 1;
            state
                .channels
                .entry(channel.to_string())
                .or_default()
                .insert(id, tx);
            id
        };

        let state = Arc::clone(&self.state);
        let channel = channel.to_string();
        Ok(Subscription::new(rx, move || {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(subs) = state.channels.get_mut(&channel) {
                subs.remove(&id);
                if subs.is_empty() {
                    state.channels.remove(&channel);
                }
            }
        }))
    }

    async fn publish(&self, channel: &str, message: SignalingMessage) -> Result<(), SessionError> {
        let mut state = self.state();
        if state.failing {
            return Err(SessionError::SignalingFailure("relay unavailable".into()));
        }
        state.published.push(message.clone());

        if RelayState::take_first_match(&mut state.drops, &message) {
            debug!(channel, kind = ?message.kind, from = %message.from, "Dropping message");
            return Ok(());
        }
        if RelayState::take_first_match(&mut state.holds, &message) {
            debug!(channel, kind = ?message.kind, from = %message.from, "Holding message back");
            state.held.push((channel.to_string(), message));
            return Ok(());
        }

        state.deliver(channel, &message);

        let (released, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut state.held).into_iter().partition(|(c, _)| c == channel);
        state.held = kept;
        for (_, held) in released {
            state.deliver(channel, &held);
        }
        Ok(())
    }
}
