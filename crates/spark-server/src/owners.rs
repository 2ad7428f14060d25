//! Which connection currently speaks for each participant.
//!
//! A client that reconnects says hello again before the server has noticed
//! its old socket died. The newest hello takes ownership, and only the
//! owning connection's departure may clear the participant's queue entries.

use std::collections::HashMap;
use std::sync::Arc;

use spark_common::ParticipantId;
use tokio::sync::RwLock;

use crate::hub::ConnId;

#[derive(Clone, Default)]
pub struct Owners {
    inner: Arc<RwLock<HashMap<ParticipantId, ConnId>>>,
}

impl Owners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `conn` the owner. Returns the connection it supersedes, if any.
    pub async fn claim(&self, participant: &ParticipantId, conn: ConnId) -> Option<ConnId> {
        self.inner
            .write()
            .await
            .insert(participant.clone(), conn)
            .filter(|old| *old != conn)
    }

    /// Give up ownership. Returns false if another connection has taken over
    /// since `conn` claimed it.
    pub async fn release(&self, participant: &ParticipantId, conn: ConnId) -> bool {
        let mut owners = self.inner.write().await;
        match owners.get(participant) {
            Some(owner) if *owner == conn => {
                owners.remove(participant);
                true
            }
            _ => false,
        }
    }
}
