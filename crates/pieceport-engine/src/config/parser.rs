//! Config YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::MigrationConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        let var_name = &cap[1];
        std::env::var(var_name).unwrap_or_else(|_| {
            if !missing.iter().any(|m| m == var_name) {
                missing.push(var_name.to_string());
            }
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}

/// Parse a config YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_config_str(yaml_str: &str) -> Result<MigrationConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: MigrationConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse migration config YAML")?;
    Ok(config)
}

/// Parse a config YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_config(path: &Path) -> Result<MigrationConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::DestinationBackend;
    use std::io::Write;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("PP_TEST_HOST", "db.example.com");
        let input = "connection: postgresql://${PP_TEST_HOST}/lid";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "connection: postgresql://db.example.com/lid");
        std::env::remove_var("PP_TEST_HOST");
    }

    #[test]
    fn test_repeated_env_var() {
        std::env::set_var("PP_TEST_REPEAT", "x");
        let result = substitute_env_vars("${PP_TEST_REPEAT}-${PP_TEST_REPEAT}").unwrap();
        assert_eq!(result, "x-x");
        std::env::remove_var("PP_TEST_REPEAT");
    }

    #[test]
    fn test_no_env_vars_passthrough() {
        let input = "policy: fail_fast\n";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_multiple_missing_env_vars_all_reported() {
        let input = "${PP_MISSING_X} and ${PP_MISSING_Y} and ${PP_MISSING_X}";
        let err_msg = substitute_env_vars(input).unwrap_err().to_string();
        assert!(err_msg.contains("PP_MISSING_X"));
        assert!(err_msg.contains("PP_MISSING_Y"));
        assert_eq!(err_msg.matches("PP_MISSING_X").count(), 1);
    }

    #[test]
    fn test_parse_config_from_string() {
        std::env::set_var("PP_TEST_PG_PASS", "secret");
        let yaml = r#"
version: "1.0"
source:
  repo: /srv/boost
destination:
  backend: postgres
  connection: "host=localhost user=lid password=${PP_TEST_PG_PASS}"
policy: fail_fast
"#;
        let config = parse_config_str(yaml).unwrap();
        assert_eq!(config.destination.backend, DestinationBackend::Postgres);
        assert!(config.destination.connection.ends_with("password=secret"));
        std::env::remove_var("PP_TEST_PG_PASS");
    }

    #[test]
    fn test_parse_invalid_yaml_errors() {
        let result = parse_config_str("this is not: [valid: yaml: {{{}}}");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "resources:\n  parallelism: 2").unwrap();
        let config = parse_config(file.path()).unwrap();
        assert_eq!(config.resources.parallelism, 2);
    }

    #[test]
    fn test_parse_config_file_not_found() {
        let err_msg = parse_config(Path::new("/nonexistent/pieceport.yaml"))
            .unwrap_err()
            .to_string();
        assert!(err_msg.contains("Failed to read config file"));
    }
}
