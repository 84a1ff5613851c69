use std::path::Path;

use anyhow::{Context, Result};

use pieceport_engine::config::validator;

use super::{load_config, ConfigOverrides};

/// Execute the `check-config` command: load, validate and print the
/// effective configuration.
pub fn execute(config_path: Option<&Path>, overrides: &ConfigOverrides) -> Result<()> {
    let config = load_config(config_path, overrides)?;
    validator::validate_config(&config)?;

    let json = serde_json::to_string_pretty(&config).context("Failed to render config")?;
    println!("{json}");
    println!("\nConfig OK.");
    Ok(())
}
