//! The peer connection state machine and the connection seam it drives.

mod connection;
mod loopback;
mod session;

pub use connection::{
    ConnectionEvent, ConnectionEvents, ConnectionState, PeerConnection, PeerConnectionFactory,
};
pub use loopback::{LoopbackConnection, LoopbackNetwork};
pub use session::{start_session, PeerEvent, PeerHandle, PeerParams, PeerState, Role};
