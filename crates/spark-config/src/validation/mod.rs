//! Full configuration validation.
//!
//! Each section has its own validator; this orchestrator calls them all
//! and collects errors into a single `ConfigError`.

mod helpers;
mod misc;


use crate::schema::SparkConfig;
use spark_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &SparkConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    misc::validate_matching(&mut errors, config);
    misc::validate_search(&mut errors, config);
    misc::validate_peer(&mut errors, config);
    misc::validate_media(&mut errors, config);
    misc::validate_gateway(&mut errors, config);
    misc::validate_server(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
