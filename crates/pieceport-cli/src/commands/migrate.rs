use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use pieceport_engine::config::{validator, DestinationBackend, MigrationConfig};
use pieceport_engine::{
    migrate_deals, migrate_index, verify_piece, MigrationContext, MigrationReport, RunStatus,
    StoreSnapshot, VerifyReport,
};
use pieceport_store::sqlite::REPO_DB_PATH;
use pieceport_store::{DestinationStore, PostgresStore, SourceStore, SqliteStore};
use pieceport_types::PieceCid;

use super::{load_config, ConfigOverrides};

/// What a `migrate` invocation acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrateSubject {
    Index,
    Deal,
    /// Compare one piece across both stores.
    Verify(PieceCid),
}

impl FromStr for MigrateSubject {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "index" => Ok(Self::Index),
            "deal" | "deals" => Ok(Self::Deal),
            other => PieceCid::parse(other).map(Self::Verify).with_context(|| {
                format!("expected 'index', 'deal' or a piece CID, got '{other}'")
            }),
        }
    }
}

/// Execute the `migrate` command.
pub async fn execute(
    subject: &str,
    config_path: Option<&Path>,
    overrides: &ConfigOverrides,
    single: bool,
) -> Result<()> {
    let subject: MigrateSubject = subject.parse()?;
    let config = load_config(config_path, overrides)?;
    validator::validate_config(&config)?;

    tracing::info!(
        backend = %config.destination.backend,
        parallelism = config.resources.parallelism,
        policy = %config.policy,
        single,
        "Migration config validated"
    );

    let (source, dest) = open_stores(&config).await?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling migration");
            signal_token.cancel();
        }
    });
    let ctx = MigrationContext::new(cancel).with_query_timeout(Some(config.query_timeout()));
    let options = config.migration_options(single);

    let result = match &subject {
        MigrateSubject::Index => migrate_index(&ctx, source.clone(), dest.clone(), &options)
            .await
            .map(Outcome::Run),
        MigrateSubject::Deal => migrate_deals(&ctx, source.clone(), dest.clone(), &options)
            .await
            .map(Outcome::Run),
        MigrateSubject::Verify(piece) => verify_piece(&ctx, source.clone(), dest.clone(), piece)
            .await
            .map(Outcome::Verify),
    };

    close_stores(source, dest).await;

    match result? {
        Outcome::Run(report) => {
            print_report(&report);
            match report.status() {
                RunStatus::Succeeded => Ok(()),
                status => bail!("{} migration finished with status {status}", report.kind),
            }
        }
        Outcome::Verify(report) => {
            print_verify(&report);
            Ok(())
        }
    }
}

enum Outcome {
    Run(MigrationReport),
    Verify(VerifyReport),
}

/// Open both stores on the blocking pool; the postgres client runs its
/// own runtime and can't be created from async context.
async fn open_stores(
    config: &MigrationConfig,
) -> Result<(Arc<dyn SourceStore>, Arc<dyn DestinationStore>)> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || open_stores_blocking(&config))
        .await
        .context("store open task failed")?
}

fn open_stores_blocking(
    config: &MigrationConfig,
) -> Result<(Arc<dyn SourceStore>, Arc<dyn DestinationStore>)> {
    let repo = config
        .source
        .repo
        .as_deref()
        .context("source.repo is not set")?;
    let chunk = config.destination.insert_chunk_size;
    let source = SqliteStore::open_repo(repo)
        .with_context(|| format!("Failed to open legacy store in {}", repo.display()))?;

    let conn = &config.destination.connection;
    let dest: Arc<dyn DestinationStore> = match config.destination.backend {
        DestinationBackend::Postgres => {
            // One connection per worker plus one for point queries.
            let connections = config.resources.parallelism + 1;
            let store =
                PostgresStore::open_with_connections(conn, Some(config.query_timeout()), connections)
                    .context("Failed to connect to destination postgres")?;
            Arc::new(store.with_insert_chunk_size(chunk))
        }
        DestinationBackend::Sqlite => {
            let path = PathBuf::from(conn);
            if same_file(&path, &repo.join(REPO_DB_PATH)) {
                bail!("destination database {} is the legacy store itself", path.display());
            }
            let store = SqliteStore::open_concurrent(&path)
                .with_context(|| format!("Failed to open destination {}", path.display()))?;
            Arc::new(store.with_insert_chunk_size(chunk))
        }
    };

    tracing::info!(
        repo = %repo.display(),
        backend = %config.destination.backend,
        "Stores opened"
    );
    Ok((Arc::new(source), dest))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Drop the stores off the async runtime.
async fn close_stores(source: Arc<dyn SourceStore>, dest: Arc<dyn DestinationStore>) {
    if let Err(e) = tokio::task::spawn_blocking(move || drop((source, dest))).await {
        tracing::warn!(error = %e, "Failed to close stores cleanly");
    }
}

fn print_report(report: &MigrationReport) {
    println!(
        "{} migration {} ({} policy).",
        capitalize(report.kind.as_str()),
        report.status(),
        report.policy
    );
    println!("  Pieces:          {}", report.total_pieces);
    println!("  Migrated:        {}", report.migrated);
    println!("  Skipped:         {}", report.skipped);
    println!("  Failed:          {}", report.failures.len());
    if report.not_attempted > 0 {
        println!("  Not attempted:   {}", report.not_attempted);
    }
    if report.records_migrated > 0 {
        println!("  Records:         {}", report.records_migrated);
    }
    if report.deals_copied + report.deals_already_present > 0 {
        println!(
            "  Deals:           {} copied, {} already present",
            report.deals_copied, report.deals_already_present
        );
    }
    println!("  Duration:        {:.2}s", report.duration_secs);

    if !report.failures.is_empty() {
        println!("\nFailed pieces:");
        for failure in &report.failures {
            println!("  {}: {}", failure.piece, failure.error);
        }
    }
}

fn print_verify(report: &VerifyReport) {
    fn row(label: &str, src: String, dst: String) {
        println!("  {label:16} {src:>24} {dst:>24}");
    }
    fn indexed_at(s: &StoreSnapshot) -> String {
        s.metadata
            .indexed_at
            .map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
    }

    let (src, dst) = (&report.source, &report.destination);
    println!("Piece {}", report.piece);
    row("", "source".into(), "destination".into());
    row("Records:", src.records.to_string(), dst.records.to_string());
    row(
        "Complete index:",
        src.metadata.complete_index.to_string(),
        dst.metadata.complete_index.to_string(),
    );
    row("Indexed at:", indexed_at(src), indexed_at(dst));
    row(
        "Deals:",
        src.metadata.deals.len().to_string(),
        dst.metadata.deals.len().to_string(),
    );
    println!();
    println!("  Counts match:    {}", yes_no(report.counts_match()));
    println!("  Metadata match:  {}", yes_no(report.metadata_match()));
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
