//! Matching queue configuration types.

use serde::{Deserialize, Serialize};

/// Server-side matching engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Commit attempts per matching pass before giving up on a conflicting snapshot.
    pub max_commit_attempts: u32,
    /// Waiting entries older than this (seconds) are reaped. 0 disables reaping.
    pub stale_entry_ttl_secs: u64,
    /// How often the reaper runs (seconds).
    pub reaper_interval_secs: u64,
    /// Capacity of the queue-change notification channel.
    pub notification_capacity: u32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 3,
            stale_entry_ttl_secs: 900,
            reaper_interval_secs: 60,
            notification_capacity: 1024,
        }
    }
}
