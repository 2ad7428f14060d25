//! Public handle for the gateway connection.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use spark_common::{
    new_correlation_id, ClientFrame, EventId, MatchNotice, ParticipantId, QueueOp, QueueReply,
    SessionError,
};
use spark_config::schema::GatewayConfig;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::debug;

use super::connection::connection_loop;
use super::types::{lock, GatewayCommand, GatewayEvent, Routes};
use crate::identity::Profile;
use crate::protocol::SignalingMessage;
use crate::queue_api::{QueueApi, QueueSubscriber};
use crate::relay::SignalingRelay;
use crate::subscription::Subscription;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Handle for one participant's connection to the server: queue calls,
/// queue notifications and room signaling over a single WebSocket.
///
/// Clones share the connection. The background task stops once every
/// clone is dropped or [`disconnect`](Self::disconnect) is called.
#[derive(Clone)]
pub struct GatewayClient {
    command_tx: mpsc::Sender<GatewayCommand>,
    connected: Arc<RwLock<bool>>,
    routes: Arc<Mutex<Routes>>,
    request_timeout: Duration,
}

impl GatewayClient {
    /// Create a new client and start the background connection.
    /// Returns `(client, event_receiver)`.
    pub fn connect(config: GatewayConfig, profile: Profile) -> (Self, mpsc::Receiver<GatewayEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);
        let connected = Arc::new(RwLock::new(false));
        let routes = Arc::new(Mutex::new(Routes::default()));

        let client = Self {
            command_tx,
            connected: Arc::clone(&connected),
            routes: Arc::clone(&routes),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        };

        tokio::spawn(connection_loop(
            config, profile, connected, routes, event_tx, command_rx,
        ));

        (client, event_rx)
    }

    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    /// Close the socket and stop reconnecting.
    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(GatewayCommand::Disconnect).await;
    }

    async fn send(&self, frame: ClientFrame) -> Result<(), SessionError> {
        self.command_tx
            .send(GatewayCommand::Send(frame))
            .await
            .map_err(|_| SessionError::SignalingFailure("gateway client stopped".into()))
    }

    /// Queue a frame from a synchronous context (subscription release).
    fn send_now(&self, frame: ClientFrame) {
        if let Err(e) = self.command_tx.try_send(GatewayCommand::Send(frame)) {
            debug!(error = %e, "Dropping frame; command queue unavailable");
        }
    }
}

// ---------------------------------------------------------------------------
// Queue API
// ---------------------------------------------------------------------------

#[async_trait]
impl QueueApi for GatewayClient {
    async fn call(&self, op: QueueOp) -> Result<QueueReply, SessionError> {
        let id = new_correlation_id();
        let name = op.name();
        let (tx, rx) = oneshot::channel();
        lock(&self.routes).pending.insert(id.clone(), tx);

        if let Err(e) = self.send(ClientFrame::Request { id: id.clone(), op }).await {
            lock(&self.routes).pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::SignalingFailure("connection lost".into())),
            Err(_) => {
                lock(&self.routes).pending.remove(&id);
                Err(SessionError::Timeout(format!("{name} request")))
            }
        }
    }
}

#[async_trait]
impl QueueSubscriber for GatewayClient {
    /// The server scopes notices to the hello identity, so `participant`
    /// only has to match it.
    async fn subscribe(
        &self,
        event_id: &EventId,
        _participant: &ParticipantId,
    ) -> Result<Subscription<MatchNotice>, SessionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (key, first) = lock(&self.routes).add_queue(event_id, tx);
        if first {
            self.send(ClientFrame::SubscribeQueue {
                event_id: event_id.clone(),
            })
            .await?;
        }

        let client = self.clone();
        let event_id = event_id.clone();
        Ok(Subscription::new(rx, move || {
            if lock(&client.routes).remove_queue(&event_id, key) {
                client.send_now(ClientFrame::UnsubscribeQueue { event_id });
            }
        }))
    }
}

// ---------------------------------------------------------------------------
// Signaling relay
// ---------------------------------------------------------------------------

#[async_trait]
impl SignalingRelay for GatewayClient {
    async fn subscribe(&self, channel: &str) -> Result<Subscription<SignalingMessage>, SessionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (key, first) = lock(&self.routes).add_channel(channel, tx);
        if first {
            self.send(ClientFrame::JoinChannel {
                channel: channel.to_string(),
                self_send: false,
            })
            .await?;
        }

        let client = self.clone();
        let channel = channel.to_string();
        Ok(Subscription::new(rx, move || {
            if lock(&client.routes).remove_channel(&channel, key) {
                client.send_now(ClientFrame::LeaveChannel { channel });
            }
        }))
    }

    async fn publish(&self, channel: &str, message: SignalingMessage) -> Result<(), SessionError> {
        let payload = serde_json::to_value(&message)
            .map_err(|e| SessionError::SignalingFailure(format!("encode: {e}")))?;
        self.send(ClientFrame::Broadcast {
            channel: channel.to_string(),
            payload,
        })
        .await
    }
}
