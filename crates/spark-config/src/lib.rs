//! Spark configuration system.
//!
//! Provides TOML-based configuration with full validation. All config
//! sections use sensible defaults so partial configs work out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use spark_config::{load_config, config_to_json};
//!
//! let config = load_config().expect("failed to load config");
//! let json = config_to_json(&config);
//! println!("{json}");
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{SparkConfig, CONFIG_SCHEMA_VERSION};

use spark_common::ConfigError;
use std::path::Path;

/// Load config from the platform default path, creating a default file
/// if none exists, and validate the result.
pub fn load_config() -> Result<SparkConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}

/// Load config from an explicit path (e.g. a `--config` override).
pub fn load_config_from(path: &Path) -> Result<SparkConfig, ConfigError> {
    let config = toml_loader::load_from_path(path)?;
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &SparkConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_to_json_contains_all_sections() {
        let config = SparkConfig::default();
        let json = config_to_json(&config);
        for section in [
            "\"matching\"",
            "\"search\"",
            "\"peer\"",
            "\"media\"",
            "\"gateway\"",
            "\"server\"",
            "\"logging\"",
        ] {
            assert!(json.contains(section), "missing {section}");
        }
    }

    #[test]
    fn config_schema_version_is_1() {
        assert_eq!(CONFIG_SCHEMA_VERSION, 1);
    }

    #[test]
    fn default_config_round_trips_through_json() {
        let config = SparkConfig::default();
        let json = config_to_json(&config);
        let parsed: SparkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.search.poll_interval_ms, 5000);
        assert_eq!(parsed.server.port, 8080);
    }

    #[test]
    fn load_config_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spark.toml");
        std::fs::write(&path, "[peer]\nice_restarts = 2\n").unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.peer.ice_restarts, 2);
    }
}
