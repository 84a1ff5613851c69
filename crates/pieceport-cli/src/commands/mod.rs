pub mod check_config;
pub mod migrate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use pieceport_engine::config::{parser, DestinationBackend, MigrationConfig};
use pieceport_engine::ErrorPolicy;

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default, Args)]
pub struct ConfigOverrides {
    /// Legacy node repo directory (holds the source database)
    #[arg(long)]
    pub repo: Option<PathBuf>,
    /// Destination backend (postgres, sqlite)
    #[arg(long)]
    pub backend: Option<DestinationBackend>,
    /// Destination connection string (or database path for sqlite)
    #[arg(long)]
    pub connect_string: Option<String>,
    /// Number of pieces migrated concurrently
    #[arg(long)]
    pub parallel: Option<usize>,
    /// Point query timeout in seconds
    #[arg(long)]
    pub query_timeout: Option<u64>,
    /// Records covered by each destination write acknowledgement
    #[arg(long)]
    pub insert_chunk_size: Option<usize>,
    /// Records buffered between a piece's reader and writer
    #[arg(long)]
    pub channel_capacity: Option<usize>,
    /// Failure policy (collect_all, fail_fast)
    #[arg(long)]
    pub policy: Option<ErrorPolicy>,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut MigrationConfig) {
        if let Some(repo) = &self.repo {
            config.source.repo = Some(repo.clone());
        }
        if let Some(backend) = self.backend {
            config.destination.backend = backend;
        }
        if let Some(conn) = &self.connect_string {
            config.destination.connection.clone_from(conn);
        }
        if let Some(n) = self.parallel {
            config.resources.parallelism = n;
        }
        if let Some(secs) = self.query_timeout {
            config.destination.query_timeout_secs = secs;
        }
        if let Some(n) = self.insert_chunk_size {
            config.destination.insert_chunk_size = n;
        }
        if let Some(n) = self.channel_capacity {
            config.resources.channel_capacity = n;
        }
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
    }
}

/// Read the config file (or start from defaults) and layer the flags on top.
pub fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<MigrationConfig> {
    let mut config = match path {
        Some(path) => parser::parse_config(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => MigrationConfig::default(),
    };
    overrides.apply(&mut config);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file_or_flags() {
        let config = load_config(None, &ConfigOverrides::default()).unwrap();
        assert_eq!(config, MigrationConfig::default());
    }

    #[test]
    fn test_flags_override_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "source:\n  repo: /from/file\ndestination:\n  connection: file-conn\nresources:\n  parallelism: 2\n"
        )
        .unwrap();

        let overrides = ConfigOverrides {
            parallel: Some(9),
            backend: Some(DestinationBackend::Sqlite),
            policy: Some(ErrorPolicy::FailFast),
            ..ConfigOverrides::default()
        };
        let config = load_config(Some(file.path()), &overrides).unwrap();

        assert_eq!(config.source.repo, Some(PathBuf::from("/from/file")));
        assert_eq!(config.destination.connection, "file-conn");
        assert_eq!(config.destination.backend, DestinationBackend::Sqlite);
        assert_eq!(config.resources.parallelism, 9);
        assert_eq!(config.policy, ErrorPolicy::FailFast);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = load_config(
            Some(Path::new("/nonexistent/pieceport.yaml")),
            &ConfigOverrides::default(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/pieceport.yaml"));
    }
}
