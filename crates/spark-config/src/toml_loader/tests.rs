//! Tests for TOML config loading, creation, and path resolution.

use super::*;
use spark_common::ConfigError;
use std::path::Path;

#[test]
fn load_from_nonexistent_returns_file_not_found() {
    let result = load_from_path(Path::new("/tmp/nonexistent_spark_config.toml"));
    assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
}

#[test]
fn load_valid_partial_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r##"
[search]
poll_interval_ms = 3000

[server]
port = 9000
"##,
    )
    .unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.search.poll_interval_ms, 3000);
    assert_eq!(config.server.port, 9000);
    // Defaults preserved
    assert_eq!(config.peer.ice_restarts, 1);
    assert!(config.media.start_audio_muted);
}

#[test]
fn load_invalid_toml_returns_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "this is not valid toml {{{").unwrap();

    let result = load_from_path(&path);
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
fn load_config_with_invalid_values_falls_back_to_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[search]
poll_interval_ms = 10
"#,
    )
    .unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.search.poll_interval_ms, 5000);
}

#[test]
fn create_and_load_default_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spark").join("config.toml");

    create_default_config(&path).unwrap();
    assert!(path.exists());

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.search.poll_interval_ms, 5000);
    assert_eq!(config.gateway.server_url, "ws://127.0.0.1:8080");
}

#[test]
fn default_config_toml_is_valid() {
    use super::template::default_config_toml;
    use crate::schema::SparkConfig;

    let content = default_config_toml();
    let config: SparkConfig = toml::from_str(&content).unwrap();
    assert_eq!(config.peer.negotiation_timeout_secs, 12);
}

#[test]
fn default_config_path_is_reasonable() {
    if let Ok(path) = default_config_path() {
        let path_str = path.to_string_lossy();
        assert!(path_str.contains("spark"));
        assert!(path_str.ends_with("config.toml"));
    }
}
