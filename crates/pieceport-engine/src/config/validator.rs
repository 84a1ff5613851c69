//! Semantic validation for parsed migration configuration values.

use anyhow::{bail, Result};

use crate::config::types::{MigrationConfig, CONFIG_VERSION};

/// Validate a parsed migration configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing every validation failure found in the config.
pub fn validate_config(config: &MigrationConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != CONFIG_VERSION {
        errors.push(format!(
            "Unsupported config version '{}', expected '{CONFIG_VERSION}'",
            config.version
        ));
    }

    match &config.source.repo {
        None => errors.push("source.repo must be set".to_string()),
        Some(repo) if repo.as_os_str().is_empty() => {
            errors.push("source.repo must not be empty".to_string());
        }
        Some(_) => {}
    }

    if config.destination.connection.trim().is_empty() {
        errors.push(format!(
            "destination.connection must not be empty for backend '{}'",
            config.destination.backend
        ));
    }

    if config.destination.query_timeout_secs == 0 {
        errors.push("destination.query_timeout_secs must be > 0".to_string());
    }

    if config.destination.insert_chunk_size == 0 {
        errors.push("destination.insert_chunk_size must be at least 1".to_string());
    }

    if config.resources.parallelism == 0 {
        errors.push("resources.parallelism must be at least 1".to_string());
    }

    if config.resources.channel_capacity == 0 {
        errors.push("resources.channel_capacity must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Config validation failed:\n  - {}", errors.join("\n  - "));
    }
}
