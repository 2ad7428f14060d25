//! Channel hub: maps channel names to the connections that joined them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use spark_common::ServerFrame;
use tokio::sync::{mpsc, RwLock};

/// Identifies one WebSocket connection for the lifetime of the process.
pub type ConnId = u64;

struct Member {
    tx: mpsc::Sender<ServerFrame>,
    self_send: bool,
}

/// Thread-safe channel membership.
#[derive(Clone, Default)]
pub struct ChannelHub {
    channels: Arc<RwLock<HashMap<String, HashMap<ConnId, Member>>>>,
    next_conn: Arc<AtomicU64>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Join `channel`. Joining again replaces the previous membership.
    pub async fn join(
        &self,
        channel: &str,
        conn: ConnId,
        tx: mpsc::Sender<ServerFrame>,
        self_send: bool,
    ) {
        self.channels
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .insert(conn, Member { tx, self_send });
    }

    /// Returns true if the connection was a member.
    pub async fn leave(&self, channel: &str, conn: ConnId) -> bool {
        let mut map = self.channels.write().await;
        let Some(members) = map.get_mut(channel) else {
            return false;
        };
        let removed = members.remove(&conn).is_some();
        if members.is_empty() {
            map.remove(channel);
        }
        removed
    }

    /// Drop every membership held by `conn`.
    pub async fn leave_all(&self, conn: ConnId) {
        let mut map = self.channels.write().await;
        map.retain(|_, members| {
            members.remove(&conn);
            !members.is_empty()
        });
    }

    /// Deliver `payload` to the channel's members. The sender receives it
    /// only if it joined with `self_send`. Returns the number of deliveries.
    pub async fn broadcast(&self, channel: &str, from: ConnId, payload: serde_json::Value) -> usize {
        let targets: Vec<mpsc::Sender<ServerFrame>> = {
            let map = self.channels.read().await;
            let Some(members) = map.get(channel) else {
                return 0;
            };
            members
                .iter()
                .filter(|(id, m)| **id != from || m.self_send)
                .map(|(_, m)| m.tx.clone())
                .collect()
        };

        let mut delivered = 0;
        for tx in targets {
            let frame = ServerFrame::Broadcast {
                channel: channel.to_string(),
                payload: payload.clone(),
            };
            // Never wait on a stalled member's outbox.
            match tx.try_send(frame) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!(channel, error = %e, "Broadcast not delivered"),
            }
        }
        delivered
    }

    /// Number of live channels.
    pub async fn count(&self) -> usize {
        self.channels.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn member(hub: &ChannelHub) -> (ConnId, mpsc::Sender<ServerFrame>, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(8);
        (hub.next_conn_id(), tx, rx)
    }

    #[tokio::test]
    async fn broadcast_skips_sender_without_self_send() {
        let hub = ChannelHub::new();
        let (a, a_tx, mut a_rx) = member(&hub);
        let (b, b_tx, mut b_rx) = member(&hub);
        hub.join("room:r1", a, a_tx, false).await;
        hub.join("room:r1", b, b_tx, false).await;

        assert_eq!(hub.broadcast("room:r1", a, json!({"n": 1})).await, 1);
        assert!(matches!(b_rx.try_recv(), Ok(ServerFrame::Broadcast { .. })));
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn self_send_echoes_to_the_sender() {
        let hub = ChannelHub::new();
        let (a, a_tx, mut a_rx) = member(&hub);
        hub.join("room:r1", a, a_tx, true).await;

        assert_eq!(hub.broadcast("room:r1", a, json!("hi")).await, 1);
        let Ok(ServerFrame::Broadcast { channel, payload }) = a_rx.try_recv() else {
            panic!("expected echo");
        };
        assert_eq!(channel, "room:r1");
        assert_eq!(payload, json!("hi"));
    }

    #[tokio::test]
    async fn empty_channels_are_removed() {
        let hub = ChannelHub::new();
        let (a, a_tx, _a_rx) = member(&hub);
        let (b, b_tx, _b_rx) = member(&hub);
        hub.join("room:r1", a, a_tx.clone(), false).await;
        hub.join("room:r2", a, a_tx, false).await;
        hub.join("room:r2", b, b_tx, false).await;
        assert_eq!(hub.count().await, 2);

        assert!(hub.leave("room:r1", a).await);
        assert!(!hub.leave("room:r1", a).await);
        assert_eq!(hub.count().await, 1);

        hub.leave_all(a).await;
        assert_eq!(hub.count().await, 1);
        hub.leave_all(b).await;
        assert_eq!(hub.count().await, 0);
    }

    #[tokio::test]
    async fn unknown_channel_delivers_nothing() {
        let hub = ChannelHub::new();
        assert_eq!(hub.broadcast("room:none", 1, json!(null)).await, 0);
    }
}
