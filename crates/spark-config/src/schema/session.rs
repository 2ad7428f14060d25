//! Client session configuration: search polling, peer negotiation, media.

use serde::{Deserialize, Serialize};

/// Match detection while searching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Interval between `status` polls (milliseconds, valid range: 1000-30000).
    pub poll_interval_ms: u64,
    /// Force a matching pass right after joining.
    pub trigger_on_join: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            trigger_on_join: true,
        }
    }
}

/// Peer connection negotiation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Overall time allowed to reach `connected` (seconds, valid range: 5-60).
    pub negotiation_timeout_secs: u64,
    /// Automatic ICE restarts after a `failed` transition (valid range: 0-3).
    pub ice_restarts: u32,
    /// How often the offerer re-sends an unanswered offer (milliseconds,
    /// valid range: 250-10000).
    pub offer_resend_interval_ms: u64,
    pub ice_servers: Vec<String>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout_secs: 12,
            ice_restarts: 1,
            offer_resend_interval_ms: 2000,
            ice_servers: vec!["stun:stun.l.google.com:19302".into()],
        }
    }
}

/// Local media policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub video: bool,
    pub audio: bool,
    /// Audio track starts disabled; conversations open video-first.
    pub start_audio_muted: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
            start_audio_muted: true,
        }
    }
}
