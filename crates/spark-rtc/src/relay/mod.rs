//! The signaling relay: a per-room publish/subscribe bus used purely as
//! transport.
//!
//! Delivery is at-least-once with no ordering across publishers and no
//! replay. The relay does not filter senders, so receivers discard their own
//! messages.

mod memory;

use async_trait::async_trait;
use spark_common::SessionError;

use crate::protocol::SignalingMessage;
use crate::subscription::Subscription;

pub use memory::MemoryRelay;

#[async_trait]
pub trait SignalingRelay: Send + Sync {
    /// Start receiving messages published on `channel` from now on.
    async fn subscribe(&self, channel: &str) -> Result<Subscription<SignalingMessage>, SessionError>;

    /// Deliver `message` to every current subscriber of `channel`.
    async fn publish(&self, channel: &str, message: SignalingMessage) -> Result<(), SessionError>;
}
