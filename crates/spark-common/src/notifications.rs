use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::errors::SessionError;

/// Severity of a message shown to the participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// What the participant can do about a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    None,
    /// Retry the permission prompt.
    RetryStart,
    /// Move on to another partner.
    NextPartner,
}

/// A visible message raised by the session layer.
#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub body: String,
    pub action: NotificationAction,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl Notification {
    /// Creates an info notification with a 5-second TTL.
    pub fn info(body: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            body: body.into(),
            action: NotificationAction::None,
            created_at: Instant::now(),
            ttl: Duration::from_secs(5),
        }
    }

    /// Creates an error notification with a 10-second TTL.
    pub fn error(body: impl Into<String>, action: NotificationAction) -> Self {
        Self {
            level: NotificationLevel::Error,
            body: body.into(),
            action,
            created_at: Instant::now(),
            ttl: Duration::from_secs(10),
        }
    }

    /// Builds the notification for a surfaced session error.
    pub fn from_error(err: &SessionError) -> Self {
        let action = match err {
            SessionError::PermissionDenied
            | SessionError::DeviceNotFound
            | SessionError::DeviceBusy
            | SessionError::TransportBlocked => NotificationAction::RetryStart,
            SessionError::SignalingFailure(_)
            | SessionError::NegotiationFailure(_)
            | SessionError::Timeout(_) => NotificationAction::NextPartner,
            _ => NotificationAction::None,
        };
        let mut n = Self::error(err.user_message(), action);
        if err.disposition() == crate::errors::Disposition::Reread {
            n.level = NotificationLevel::Warning;
        }
        n
    }

    /// Returns `true` if this notification has exceeded its TTL.
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }
}

/// A bounded queue of notifications that auto-evicts expired entries.
#[derive(Debug)]
pub struct NotificationQueue {
    items: VecDeque<Notification>,
    capacity: usize,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes a notification, evicting expired entries first.
    /// If still at capacity after eviction, the oldest entry is removed.
    pub fn push(&mut self, notification: Notification) {
        self.evict_expired();
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(notification);
    }

    /// Returns all currently visible (non-expired) notifications.
    pub fn visible(&mut self) -> Vec<&Notification> {
        self.evict_expired();
        self.items.iter().collect()
    }

    /// Most recent notification, expired or not.
    pub fn latest(&self) -> Option<&Notification> {
        self.items.back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn evict_expired(&mut self) {
        self.items.retain(|n| !n.is_expired());
    }
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::EventId;

    #[test]
    fn permission_denied_offers_retry() {
        let n = Notification::from_error(&SessionError::PermissionDenied);
        assert_eq!(n.level, NotificationLevel::Error);
        assert_eq!(n.action, NotificationAction::RetryStart);
    }

    #[test]
    fn negotiation_failure_offers_next_partner() {
        let n = Notification::from_error(&SessionError::NegotiationFailure("ice".into()));
        assert_eq!(n.action, NotificationAction::NextPartner);
        assert!(n.body.contains("next partner"));
    }

    #[test]
    fn no_ticket_has_no_action() {
        let n = Notification::from_error(&SessionError::NoTicket(EventId::from("e")));
        assert_eq!(n.action, NotificationAction::None);
    }

    #[test]
    fn queue_drops_oldest_at_capacity() {
        let mut q = NotificationQueue::new(2);
        q.push(Notification::info("one"));
        q.push(Notification::info("two"));
        q.push(Notification::info("three"));
        assert_eq!(q.len(), 2);
        let bodies: Vec<_> = q.visible().iter().map(|n| n.body.clone()).collect();
        assert_eq!(bodies, vec!["two", "three"]);
        assert_eq!(q.latest().unwrap().body, "three");
    }

    #[test]
    fn expired_entries_are_evicted() {
        let mut q = NotificationQueue::default();
        let mut stale = Notification::info("old");
        stale.ttl = Duration::ZERO;
        q.push(stale);
        assert!(q.visible().is_empty());
        assert!(q.is_empty());
    }
}
