//! Configuration schema types for Spark.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod matching;
mod network;
mod session;
mod system;

pub use matching::*;
pub use network::*;
pub use session::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration shared by the server and client crates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct SparkConfig {
    pub matching: MatchingConfig,
    pub search: SearchConfig,
    pub peer: PeerConfig,
    pub media: MediaConfig,
    pub gateway: GatewayConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}
