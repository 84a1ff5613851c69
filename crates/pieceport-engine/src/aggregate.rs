//! Outcome collection under an explicit failure policy.

use std::ops::ControlFlow;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::outcome::{MigrationKind, MigrationOutcome, MigrationReport, PieceFailure, PieceStatus};

/// How a run reacts to a failed piece.
///
/// Applies the same way to index and deal migration, whatever the
/// worker topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop the run at the first failed piece.
    FailFast,
    /// Attempt every piece, report all failures at the end.
    #[default]
    CollectAll,
}

impl ErrorPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailFast => "fail_fast",
            Self::CollectAll => "collect_all",
        }
    }
}

impl std::fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(Self::FailFast),
            "collect_all" => Ok(Self::CollectAll),
            other => Err(format!(
                "unknown error policy '{other}', expected fail-fast or collect-all"
            )),
        }
    }
}

/// Folds [`MigrationOutcome`]s into a [`MigrationReport`].
#[derive(Debug)]
pub struct ErrorAggregator {
    kind: MigrationKind,
    policy: ErrorPolicy,
    started: Instant,
    migrated: usize,
    skipped: usize,
    cancelled_outcomes: usize,
    records_migrated: u64,
    deals_copied: usize,
    deals_already_present: usize,
    failures: Vec<PieceFailure>,
}

impl ErrorAggregator {
    #[must_use]
    pub fn new(kind: MigrationKind, policy: ErrorPolicy) -> Self {
        Self {
            kind,
            policy,
            started: Instant::now(),
            migrated: 0,
            skipped: 0,
            cancelled_outcomes: 0,
            records_migrated: 0,
            deals_copied: 0,
            deals_already_present: 0,
            failures: Vec::new(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Number of outcomes recorded so far.
    #[must_use]
    pub fn seen(&self) -> usize {
        self.migrated + self.skipped + self.cancelled_outcomes + self.failures.len()
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Record one outcome.
    ///
    /// Returns [`ControlFlow::Break`] when the policy says the run must
    /// stop. Outcomes of pieces interrupted by cancellation are counted
    /// as not attempted rather than as failures.
    pub fn record(&mut self, outcome: MigrationOutcome) -> ControlFlow<()> {
        let MigrationOutcome { piece, result } = outcome;
        match result {
            Ok(PieceStatus::Skipped) => {
                self.skipped += 1;
                ControlFlow::Continue(())
            }
            Ok(PieceStatus::Indexed { records }) => {
                self.migrated += 1;
                self.records_migrated += records;
                ControlFlow::Continue(())
            }
            Ok(PieceStatus::Deals {
                copied,
                already_present,
            }) => {
                self.migrated += 1;
                self.deals_copied += copied;
                self.deals_already_present += already_present;
                ControlFlow::Continue(())
            }
            Err(error) if error.is_cancelled() => {
                self.cancelled_outcomes += 1;
                ControlFlow::Continue(())
            }
            Err(error) => {
                tracing::error!(
                    piece = %piece,
                    kind = error.kind(),
                    migration = %self.kind,
                    "Piece migration failed: {error}"
                );
                self.failures.push(PieceFailure { piece, error });
                match self.policy {
                    ErrorPolicy::FailFast => ControlFlow::Break(()),
                    ErrorPolicy::CollectAll => ControlFlow::Continue(()),
                }
            }
        }
    }

    /// Close the run. `total_pieces` is the enumerated set size;
    /// anything not recorded counts as not attempted.
    #[must_use]
    pub fn finish(self, total_pieces: usize, cancelled: bool) -> MigrationReport {
        let seen = self.seen();
        MigrationReport {
            kind: self.kind,
            policy: self.policy,
            total_pieces,
            migrated: self.migrated,
            skipped: self.skipped,
            not_attempted: self.cancelled_outcomes + total_pieces.saturating_sub(seen),
            records_migrated: self.records_migrated,
            deals_copied: self.deals_copied,
            deals_already_present: self.deals_already_present,
            failures: self.failures,
            cancelled,
            duration_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MigrationError;
    use crate::outcome::RunStatus;
    use pieceport_store::StoreError;
    use pieceport_types::PieceCid;

    fn cid(s: &str) -> PieceCid {
        PieceCid::parse(s).unwrap()
    }

    fn ok(piece: &str, records: u64) -> MigrationOutcome {
        MigrationOutcome::new(cid(piece), Ok(PieceStatus::Indexed { records }))
    }

    fn failed(piece: &str) -> MigrationOutcome {
        MigrationOutcome::new(
            cid(piece),
            Err(MigrationError::SourceRead {
                piece: cid(piece),
                source: StoreError::Corrupt("unreadable".into()),
            }),
        )
    }

    #[test]
    fn collect_all_keeps_going() {
        let mut agg = ErrorAggregator::new(MigrationKind::Index, ErrorPolicy::CollectAll);
        assert!(agg.record(failed("bafya")).is_continue());
        assert!(agg.record(ok("bafyb", 10)).is_continue());
        assert!(agg.record(failed("bafyc")).is_continue());
        let report = agg.finish(3, false);
        assert_eq!(report.migrated, 1);
        assert_eq!(report.records_migrated, 10);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.status(), RunStatus::PartialFailure);
        assert_eq!(report.not_attempted, 0);
    }

    #[test]
    fn fail_fast_breaks_on_first_failure() {
        let mut agg = ErrorAggregator::new(MigrationKind::Index, ErrorPolicy::FailFast);
        assert!(agg.record(ok("bafya", 1)).is_continue());
        assert!(agg.record(failed("bafyb")).is_break());
        let report = agg.finish(5, false);
        assert_eq!(report.not_attempted, 3);
        assert_eq!(report.first_error().unwrap().kind(), "source_read");
    }

    #[test]
    fn cancelled_outcomes_are_not_failures() {
        let mut agg = ErrorAggregator::new(MigrationKind::Deal, ErrorPolicy::FailFast);
        let outcome = MigrationOutcome::new(cid("bafya"), Err(MigrationError::Cancelled));
        assert!(agg.record(outcome).is_continue());
        assert!(!agg.has_failures());
        let report = agg.finish(1, true);
        assert_eq!(report.not_attempted, 1);
        assert_eq!(report.status(), RunStatus::Cancelled);
    }

    #[test]
    fn deal_outcomes_accumulate() {
        let mut agg = ErrorAggregator::new(MigrationKind::Deal, ErrorPolicy::CollectAll);
        let outcome = MigrationOutcome::new(
            cid("bafya"),
            Ok(PieceStatus::Deals {
                copied: 2,
                already_present: 1,
            }),
        );
        let _ = agg.record(outcome);
        let _ = agg.record(MigrationOutcome::new(cid("bafyb"), Ok(PieceStatus::Skipped)));
        let report = agg.finish(2, false);
        assert_eq!(report.deals_copied, 2);
        assert_eq!(report.deals_already_present, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.is_success());
    }

    #[test]
    fn policy_parses_cli_spellings() {
        assert_eq!("fail-fast".parse::<ErrorPolicy>(), Ok(ErrorPolicy::FailFast));
        assert_eq!("collect_all".parse::<ErrorPolicy>(), Ok(ErrorPolicy::CollectAll));
        assert_eq!("Collect-All".parse::<ErrorPolicy>(), Ok(ErrorPolicy::CollectAll));
        assert!("retry".parse::<ErrorPolicy>().is_err());
        assert_eq!(ErrorPolicy::default(), ErrorPolicy::CollectAll);
    }
}
