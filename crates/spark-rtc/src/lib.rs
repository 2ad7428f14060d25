//! Client side of a Spark event: the room controller, the peer connection
//! state machine, media handling, and the transports they run over.

pub mod controller;
pub mod gateway;
pub mod identity;
pub mod media;
pub mod peer;
pub mod protocol;
pub mod queue_api;
pub mod relay;
pub mod request_cache;
pub mod subscription;

pub use controller::{ControllerConfig, ControllerEvent, Phase, RoomHandle, Services};
pub use gateway::{GatewayClient, GatewayEvent};
pub use identity::{IdentityService, Profile, StaticIdentity, TicketList, TicketService};
pub use media::{
    FakeDevices, MediaConstraints, MediaDevices, MediaStream, MediaTrack, PermissionFlow,
    PermissionState, TrackKind,
};
pub use peer::{
    start_session, LoopbackNetwork, PeerConnection, PeerConnectionFactory, PeerEvent, PeerHandle,
    PeerParams, PeerState, Role,
};
pub use protocol::{Signal, SignalKind, SignalingMessage};
pub use queue_api::{LocalQueue, QueueApi, QueueSubscriber};
pub use relay::{MemoryRelay, SignalingRelay};
pub use request_cache::{CachedQueue, RequestCache};
pub use subscription::Subscription;
