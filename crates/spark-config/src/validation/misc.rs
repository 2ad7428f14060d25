//! Per-section validators.

use crate::schema::SparkConfig;

use super::helpers::validate_range;

/// Validate matching engine constraints.
pub(crate) fn validate_matching(errors: &mut Vec<String>, config: &SparkConfig) {
    validate_range(
        errors,
        "matching.max_commit_attempts",
        config.matching.max_commit_attempts.into(),
        1,
        10,
    );
    validate_range(
        errors,
        "matching.reaper_interval_secs",
        config.matching.reaper_interval_secs,
        1,
        3600,
    );
    validate_range(
        errors,
        "matching.notification_capacity",
        config.matching.notification_capacity.into(),
        16,
        65536,
    );
}

/// Validate search polling constraints.
pub(crate) fn validate_search(errors: &mut Vec<String>, config: &SparkConfig) {
    validate_range(
        errors,
        "search.poll_interval_ms",
        config.search.poll_interval_ms,
        1000,
        30000,
    );
}

/// Validate peer negotiation constraints.
pub(crate) fn validate_peer(errors: &mut Vec<String>, config: &SparkConfig) {
    validate_range(
        errors,
        "peer.negotiation_timeout_secs",
        config.peer.negotiation_timeout_secs,
        5,
        60,
    );
    validate_range(errors, "peer.ice_restarts", config.peer.ice_restarts.into(), 0, 3);
    validate_range(
        errors,
        "peer.offer_resend_interval_ms",
        config.peer.offer_resend_interval_ms,
        250,
        10_000,
    );
}

/// Validate media constraints.
pub(crate) fn validate_media(errors: &mut Vec<String>, config: &SparkConfig) {
    if !config.media.video && !config.media.audio {
        errors.push("media: at least one of video or audio must be enabled".into());
    }
}

/// Validate gateway client constraints.
pub(crate) fn validate_gateway(errors: &mut Vec<String>, config: &SparkConfig) {
    let gw = &config.gateway;
    if !(gw.server_url.starts_with("ws://") || gw.server_url.starts_with("wss://")) {
        errors.push(format!(
            "gateway.server_url = {} must use ws:// or wss://",
            gw.server_url
        ));
    }
    validate_range(
        errors,
        "gateway.heartbeat_interval_secs",
        gw.heartbeat_interval_secs,
        5,
        120,
    );
    validate_range(
        errors,
        "gateway.request_timeout_secs",
        gw.request_timeout_secs,
        1,
        60,
    );
    if gw.reconnect_delay_secs == 0 || gw.reconnect_delay_secs > gw.max_reconnect_delay_secs {
        errors.push(format!(
            "gateway.reconnect_delay_secs = {} must be in [1, max_reconnect_delay_secs = {}]",
            gw.reconnect_delay_secs, gw.max_reconnect_delay_secs
        ));
    }
}

/// Validate server endpoint constraints.
pub(crate) fn validate_server(errors: &mut Vec<String>, config: &SparkConfig) {
    validate_range(errors, "server.port", config.server.port.into(), 1, 65535);
    validate_range(
        errors,
        "server.hello_timeout_secs",
        config.server.hello_timeout_secs,
        1,
        60,
    );
}
