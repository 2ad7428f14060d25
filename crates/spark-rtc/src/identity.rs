//! Collaborators consulted before a session may start: who the participant
//! is, and whether they hold a ticket for the event.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spark_common::{EventId, ParticipantId};

#[derive(Clone, Serialize, Deserialize)]
pub struct Profile {
    pub participant_id: ParticipantId,
    pub display_name: String,
    /// Bearer token for the gateway, if the identity service issued one.
    #[serde(skip)]
    pub access_token: Option<String>,
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("participant_id", &self.participant_id)
            .field("display_name", &self.display_name)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Profile {
    pub fn new(participant_id: impl Into<ParticipantId>, display_name: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            display_name: display_name.into(),
            access_token: None,
        }
    }
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// The signed-in participant, if any.
    async fn current(&self) -> Option<Profile>;
}

#[async_trait]
pub trait TicketService: Send + Sync {
    async fn has_ticket(&self, event_id: &EventId) -> bool;
}

/// A fixed identity, or nobody.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(pub Option<Profile>);

#[async_trait]
impl IdentityService for StaticIdentity {
    async fn current(&self) -> Option<Profile> {
        self.0.clone()
    }
}

/// Tickets held, by event.
#[derive(Debug, Clone, Default)]
pub struct TicketList(HashSet<EventId>);

impl TicketList {
    pub fn new(events: impl IntoIterator<Item = EventId>) -> Self {
        Self(events.into_iter().collect())
    }
}

#[async_trait]
impl TicketService for TicketList {
    async fn has_ticket(&self, event_id: &EventId) -> bool {
        self.0.contains(event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let mut profile = Profile::new("a1", "Ada");
        profile.access_token = Some("secret".into());
        let shown = format!("{profile:?}");
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains("secret"));
    }

    #[tokio::test]
    async fn ticket_list_answers_membership() {
        let tickets = TicketList::new([EventId::from("evt1")]);
        assert!(tickets.has_ticket(&EventId::from("evt1")).await);
        assert!(!tickets.has_ticket(&EventId::from("evt2")).await);
    }
}
