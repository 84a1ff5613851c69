use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregate::ErrorPolicy;
use crate::orchestrator::MigrationOptions;

pub const CONFIG_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub destination: DestinationConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub policy: ErrorPolicy,
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            source: SourceConfig::default(),
            destination: DestinationConfig::default(),
            resources: ResourceConfig::default(),
            policy: ErrorPolicy::default(),
        }
    }
}

impl MigrationConfig {
    /// Worker-pool options for a run; `single` stops after the first
    /// eligible piece.
    #[must_use]
    pub fn migration_options(&self, single: bool) -> MigrationOptions {
        MigrationOptions {
            parallelism: self.resources.parallelism,
            channel_capacity: self.resources.channel_capacity,
            policy: self.policy,
            single,
        }
    }

    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.destination.query_timeout_secs)
    }
}

/// Legacy store location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Repository directory holding the legacy piece database.
    pub repo: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationBackend {
    #[default]
    Postgres,
    Sqlite,
}

impl DestinationBackend {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for DestinationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DestinationBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!(
                "unknown destination backend '{other}', expected postgres or sqlite"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationConfig {
    #[serde(default)]
    pub backend: DestinationBackend,
    /// Connection string for postgres, database file path for sqlite.
    #[serde(default)]
    pub connection: String,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_insert_chunk_size")]
    pub insert_chunk_size: usize,
}

fn default_query_timeout_secs() -> u64 {
    60
}

fn default_insert_chunk_size() -> usize {
    pieceport_store::DEFAULT_INSERT_CHUNK_SIZE
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            backend: DestinationBackend::default(),
            connection: String::new(),
            query_timeout_secs: default_query_timeout_secs(),
            insert_chunk_size: default_insert_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_parallelism() -> usize {
    4
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_config() {
        let yaml = r#"
source:
  repo: /var/lib/boost
destination:
  connection: postgresql://localhost/lid
"#;
        let config: MigrationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.source.repo, Some(PathBuf::from("/var/lib/boost")));
        assert_eq!(config.destination.backend, DestinationBackend::Postgres);
        assert_eq!(config.destination.query_timeout_secs, 60);
        assert_eq!(config.destination.insert_chunk_size, 1_000);
        assert_eq!(config.resources.parallelism, 4);
        assert_eq!(config.resources.channel_capacity, 256);
        assert_eq!(config.policy, ErrorPolicy::CollectAll);
    }

    #[test]
    fn test_deserialize_full_config() {
        let yaml = r#"
version: "1.0"
source:
  repo: ./repo
destination:
  backend: sqlite
  connection: /tmp/dest.sqlite
  query_timeout_secs: 5
  insert_chunk_size: 50
resources:
  parallelism: 16
  channel_capacity: 8
policy: fail_fast
"#;
        let config: MigrationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.destination.backend, DestinationBackend::Sqlite);
        assert_eq!(config.query_timeout(), Duration::from_secs(5));
        let opts = config.migration_options(true);
        assert_eq!(opts.parallelism, 16);
        assert_eq!(opts.channel_capacity, 8);
        assert_eq!(opts.policy, ErrorPolicy::FailFast);
        assert!(opts.single);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let yaml = "destination:\n  backend: yugabyte\n";
        assert!(serde_yaml::from_str::<MigrationConfig>(yaml).is_err());
        assert!("yugabyte".parse::<DestinationBackend>().is_err());
        assert_eq!(
            "PostgreSQL".parse::<DestinationBackend>(),
            Ok(DestinationBackend::Postgres)
        );
    }

    #[test]
    fn test_empty_document_is_default() {
        let config: MigrationConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, MigrationConfig::default());
    }
}
