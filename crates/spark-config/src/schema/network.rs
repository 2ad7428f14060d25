//! Gateway client and server endpoint configuration.

use serde::{Deserialize, Serialize};

/// Client connection to the matching/signaling server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server_url: String,
    /// Heartbeat interval in seconds (valid range: 5-120).
    pub heartbeat_interval_secs: u64,
    /// Reconnect base delay in seconds.
    pub reconnect_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay_secs: u64,
    /// Time to wait for a queue request's response (seconds).
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080".into(),
            heartbeat_interval_secs: 25,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
            request_timeout_secs: 10,
        }
    }
}

/// Listening socket for the server binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds a new connection has to send its hello frame.
    pub hello_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            hello_timeout_secs: 10,
        }
    }
}
