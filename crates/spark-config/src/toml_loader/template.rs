//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Spark Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[matching]
# max_commit_attempts = 3        # 1-10
# stale_entry_ttl_secs = 900     # 0 disables reaping
# reaper_interval_secs = 60
# notification_capacity = 1024

[search]
# poll_interval_ms = 5000        # 1000-30000
# trigger_on_join = true

[peer]
# negotiation_timeout_secs = 12  # 5-60
# ice_restarts = 1               # 0-3
# offer_resend_interval_ms = 2000  # 250-10000
# ice_servers = ["stun:stun.l.google.com:19302"]

[media]
# video = true
# audio = true
# start_audio_muted = true

[gateway]
# server_url = "ws://127.0.0.1:8080"
# heartbeat_interval_secs = 25   # 5-120
# reconnect_delay_secs = 1
# max_reconnect_delay_secs = 30
# request_timeout_secs = 10

[server]
# host = "0.0.0.0"
# port = 8080
# hello_timeout_secs = 10

[logging]
# level = "info"                 # trace, debug, info, warn, error
"##
    .to_string()
}
