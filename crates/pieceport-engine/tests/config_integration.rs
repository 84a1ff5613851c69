//! Config file parsing and validation against fixture files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pieceport_engine::config::{parser, validator, DestinationBackend};
use pieceport_engine::ErrorPolicy;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

#[test]
fn test_parse_and_validate_fixture_config() {
    std::env::set_var("TEST_PIECEPORT_REPO", "/srv/boost");
    std::env::set_var("TEST_PIECEPORT_PG_HOST", "db.internal");

    let config = parser::parse_config(&fixture("migrate.yaml")).expect("fixture must parse");

    assert_eq!(config.source.repo, Some(PathBuf::from("/srv/boost")));
    assert_eq!(config.destination.backend, DestinationBackend::Postgres);
    assert_eq!(
        config.destination.connection,
        "host=db.internal dbname=lid user=lid"
    );
    assert_eq!(config.query_timeout(), Duration::from_secs(30));
    assert_eq!(config.destination.insert_chunk_size, 500);
    assert_eq!(config.policy, ErrorPolicy::FailFast);

    let opts = config.migration_options(false);
    assert_eq!(opts.parallelism, 8);
    assert_eq!(opts.channel_capacity, 128);

    validator::validate_config(&config).expect("fixture must validate");

    std::env::remove_var("TEST_PIECEPORT_REPO");
    std::env::remove_var("TEST_PIECEPORT_PG_HOST");
}

#[test]
fn test_fixture_without_env_fails_to_parse() {
    std::env::remove_var("TEST_PIECEPORT_MISSING_ONLY");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.yaml");
    std::fs::write(&path, "source:\n  repo: ${TEST_PIECEPORT_MISSING_ONLY}\n").unwrap();

    let err = parser::parse_config(&path).unwrap_err().to_string();
    assert!(err.contains("TEST_PIECEPORT_MISSING_ONLY"), "got: {err}");
}
