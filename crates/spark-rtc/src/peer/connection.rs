use std::sync::Arc;

use async_trait::async_trait;
use spark_common::SessionError;
use tokio::sync::mpsc;

use crate::media::MediaStream;
use crate::protocol::{IceCandidate, SessionDescription};

/// Transport-level state reported by the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notifications from a peer connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A local candidate was gathered and should be sent to the peer.
    IceCandidate(IceCandidate),
    StateChanged(ConnectionState),
    /// The peer's media arrived.
    RemoteStream(MediaStream),
}

/// The operations negotiation needs from a WebRTC peer connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_stream(&self, stream: &MediaStream) -> Result<(), SessionError>;

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, SessionError>;

    async fn create_answer(&self) -> Result<SessionDescription, SessionError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), SessionError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), SessionError>;

    /// Fails if no remote description has been applied yet.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError>;

    async fn close(&self);
}

pub type ConnectionEvents = mpsc::UnboundedReceiver<ConnectionEvent>;

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[String],
    ) -> Result<(Arc<dyn PeerConnection>, ConnectionEvents), SessionError>;
}
