//! Run-level orchestration: enumerate, dispatch workers, aggregate.

use std::ops::ControlFlow;
use std::sync::Arc;

use pieceport_store::{DestinationStore, SourceStore};
use pieceport_types::PieceCid;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::instrument::WithSubscriber;
use tracing::Instrument;

use crate::aggregate::{ErrorAggregator, ErrorPolicy};
use crate::context::MigrationContext;
use crate::errors::MigrationError;
use crate::outcome::{MigrationKind, MigrationOutcome, MigrationReport};
use crate::{deal, enumerate, index};

/// Knobs for one migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Pieces transferred at once.
    pub parallelism: usize,
    /// Records buffered between a piece's reader and writer.
    pub channel_capacity: usize,
    pub policy: ErrorPolicy,
    /// Stop after the first piece that needed work.
    pub single: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            parallelism: 4,
            channel_capacity: 256,
            policy: ErrorPolicy::default(),
            single: false,
        }
    }
}

/// Migrate the index of every source piece to `dest`.
///
/// Pieces already indexed at the destination are skipped without any
/// source read. Up to `options.parallelism` pieces are in flight at once;
/// every dispatched task is joined before this returns, including after a
/// fail-fast stop or a cancellation of `ctx`.
///
/// # Errors
///
/// Returns [`MigrationError::Enumeration`] if the source can't list its
/// pieces, [`MigrationError::Cancelled`] if `ctx` is cancelled before
/// enumeration finishes, and [`MigrationError::Infrastructure`] if a
/// worker task panics or the pool closes. Per-piece failures are reported
/// in the returned [`MigrationReport`].
pub async fn migrate_index(
    ctx: &MigrationContext,
    source: Arc<dyn SourceStore>,
    dest: Arc<dyn DestinationStore>,
    options: &MigrationOptions,
) -> Result<MigrationReport, MigrationError> {
    let dispatch = ctx.dispatch().clone();
    run_index(ctx, source, dest, options)
        .with_subscriber(dispatch)
        .await
}

/// Migrate the deals of every source piece to `dest`, one piece at a time.
///
/// Deals already listed at the destination (by deal UUID) are not
/// written again. `options.parallelism` and `options.channel_capacity`
/// are ignored.
///
/// # Errors
///
/// Same as [`migrate_index`].
pub async fn migrate_deals(
    ctx: &MigrationContext,
    source: Arc<dyn SourceStore>,
    dest: Arc<dyn DestinationStore>,
    options: &MigrationOptions,
) -> Result<MigrationReport, MigrationError> {
    let dispatch = ctx.dispatch().clone();
    run_deals(ctx, source, dest, options)
        .with_subscriber(dispatch)
        .await
}

async fn run_index(
    ctx: &MigrationContext,
    source: Arc<dyn SourceStore>,
    dest: Arc<dyn DestinationStore>,
    options: &MigrationOptions,
) -> Result<MigrationReport, MigrationError> {
    let pieces = enumerate::list_all(ctx, &source).await?;
    let total = pieces.len();
    let mut aggregator = ErrorAggregator::new(MigrationKind::Index, options.policy);

    tracing::info!(
        pieces = total,
        parallelism = options.parallelism,
        policy = %options.policy,
        single = options.single,
        "Starting index migration"
    );

    if options.single {
        run_index_single(ctx, &source, &dest, pieces, options, &mut aggregator).await;
    } else {
        run_index_pool(ctx, &source, &dest, pieces, options, &mut aggregator).await?;
    }

    let report = aggregator.finish(total, ctx.is_cancelled());
    log_summary(&report);
    Ok(report)
}

/// Sequential walk that stops after the first piece the gate lets
/// through, whatever its outcome.
async fn run_index_single(
    ctx: &MigrationContext,
    source: &Arc<dyn SourceStore>,
    dest: &Arc<dyn DestinationStore>,
    pieces: Vec<PieceCid>,
    options: &MigrationOptions,
    aggregator: &mut ErrorAggregator,
) {
    for piece in pieces {
        if ctx.is_cancelled() {
            break;
        }
        let span = tracing::debug_span!("piece", piece = %piece);
        let result = index::migrate_piece(ctx, source, dest, &piece, options.channel_capacity)
            .instrument(span)
            .await;
        let outcome = MigrationOutcome::new(piece, result);
        let attempted = !outcome.is_skipped();
        if aggregator.record(outcome).is_break() || attempted {
            break;
        }
    }
}

/// Bounded pool: a semaphore gates task start, a `JoinSet` holds the
/// tasks until they are joined.
///
/// A task publishes its outcome before it releases its permit, so once a
/// permit is acquired every piece that freed a slot has been recorded and
/// a fail-fast stop is seen before the next piece starts.
async fn run_index_pool(
    ctx: &MigrationContext,
    source: &Arc<dyn SourceStore>,
    dest: &Arc<dyn DestinationStore>,
    pieces: Vec<PieceCid>,
    options: &MigrationOptions,
    aggregator: &mut ErrorAggregator,
) -> Result<(), MigrationError> {
    // Cancelled on its own to stop a fail-fast run.
    let run_ctx = ctx.child();
    let semaphore = Arc::new(Semaphore::new(options.parallelism.max(1)));
    // Room for every outcome: publishing never waits.
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<MigrationOutcome>(pieces.len().max(1));
    let mut join_set: JoinSet<()> = JoinSet::new();
    let mut panicked: Option<MigrationError> = None;

    for piece in pieces {
        let permit = tokio::select! {
            biased;
            () = run_ctx.cancel_token().cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => permit.map_err(|e| {
                MigrationError::Infrastructure(anyhow::anyhow!("Semaphore closed: {e}"))
            })?,
        };

        while let Ok(outcome) = outcome_rx.try_recv() {
            absorb(outcome, aggregator, &run_ctx);
        }
        while let Some(joined) = join_set.try_join_next() {
            check_joined(joined, &run_ctx, &mut panicked);
        }
        if run_ctx.is_cancelled() {
            break;
        }

        let task_ctx = run_ctx.clone();
        let source = Arc::clone(source);
        let dest = Arc::clone(dest);
        let outcome_tx = outcome_tx.clone();
        let channel_capacity = options.channel_capacity;
        let span = tracing::debug_span!("piece", piece = %piece);
        join_set.spawn(
            async move {
                let result =
                    index::migrate_piece(&task_ctx, &source, &dest, &piece, channel_capacity)
                        .await;
                let _ = outcome_tx.send(MigrationOutcome::new(piece, result)).await;
                drop(permit);
            }
            .instrument(span)
            .with_subscriber(ctx.dispatch().clone()),
        );
    }
    drop(outcome_tx);

    loop {
        tokio::select! {
            Some(outcome) = outcome_rx.recv() => absorb(outcome, aggregator, &run_ctx),
            joined = join_set.join_next() => match joined {
                Some(joined) => check_joined(joined, &run_ctx, &mut panicked),
                None => break,
            },
        }
    }
    while let Ok(outcome) = outcome_rx.try_recv() {
        absorb(outcome, aggregator, &run_ctx);
    }

    match panicked {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn absorb(
    outcome: MigrationOutcome,
    aggregator: &mut ErrorAggregator,
    run_ctx: &MigrationContext,
) {
    if let ControlFlow::Break(()) = aggregator.record(outcome) {
        tracing::warn!("Stopping run after first failure (fail_fast)");
        run_ctx.cancel();
    }
}

fn check_joined(
    joined: Result<(), JoinError>,
    run_ctx: &MigrationContext,
    panicked: &mut Option<MigrationError>,
) {
    if let Err(join_err) = joined {
        tracing::error!("Piece task panicked: {join_err}");
        run_ctx.cancel();
        if panicked.is_none() {
            *panicked = Some(MigrationError::Infrastructure(anyhow::anyhow!(
                "Piece task panicked: {join_err}"
            )));
        }
    }
}

async fn run_deals(
    ctx: &MigrationContext,
    source: Arc<dyn SourceStore>,
    dest: Arc<dyn DestinationStore>,
    options: &MigrationOptions,
) -> Result<MigrationReport, MigrationError> {
    let pieces = enumerate::list_all(ctx, &source).await?;
    let total = pieces.len();
    let mut aggregator = ErrorAggregator::new(MigrationKind::Deal, options.policy);

    tracing::info!(
        pieces = total,
        policy = %options.policy,
        single = options.single,
        "Starting deal migration"
    );

    for piece in pieces {
        if ctx.is_cancelled() {
            break;
        }
        let span = tracing::debug_span!("piece", piece = %piece);
        let result = deal::migrate_piece(ctx, &source, &dest, &piece)
            .instrument(span)
            .await;
        let outcome = MigrationOutcome::new(piece, result);
        let attempted = outcome.had_work();
        if aggregator.record(outcome).is_break() || (options.single && attempted) {
            break;
        }
    }

    let report = aggregator.finish(total, ctx.is_cancelled());
    log_summary(&report);
    Ok(report)
}

fn log_summary(report: &MigrationReport) {
    tracing::info!(
        migration = %report.kind,
        status = %report.status(),
        total = report.total_pieces,
        migrated = report.migrated,
        skipped = report.skipped,
        failed = report.failures.len(),
        not_attempted = report.not_attempted,
        records = report.records_migrated,
        deals_copied = report.deals_copied,
        deals_already_present = report.deals_already_present,
        duration_secs = report.duration_secs,
        "Migration finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let opts = MigrationOptions::default();
        assert_eq!(opts.parallelism, 4);
        assert_eq!(opts.channel_capacity, 256);
        assert_eq!(opts.policy, ErrorPolicy::CollectAll);
        assert!(!opts.single);
    }
}
