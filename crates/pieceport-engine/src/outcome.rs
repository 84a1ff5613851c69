//! Per-piece outcomes and run-level reports.

use pieceport_types::PieceCid;

use crate::aggregate::ErrorPolicy;
use crate::errors::MigrationError;

/// Which migration a run performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationKind {
    Index,
    Deal,
}

impl MigrationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Deal => "deal",
        }
    }
}

impl std::fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one piece that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PieceStatus {
    /// The destination already had the piece's index.
    Skipped,
    /// The index was copied.
    Indexed { records: u64 },
    /// Deals were copied; `already_present` were found at the
    /// destination and left alone.
    Deals {
        copied: usize,
        already_present: usize,
    },
}

/// Result of one worker invocation for one piece.
#[derive(Debug)]
pub struct MigrationOutcome {
    pub piece: PieceCid,
    pub result: Result<PieceStatus, MigrationError>,
}

impl MigrationOutcome {
    #[must_use]
    pub fn new(piece: PieceCid, result: Result<PieceStatus, MigrationError>) -> Self {
        Self { piece, result }
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self.result, Ok(PieceStatus::Skipped))
    }

    /// Whether the piece needed anything written: failures count, a
    /// skip or a piece whose deals were all present does not.
    #[must_use]
    pub fn had_work(&self) -> bool {
        !matches!(
            self.result,
            Ok(PieceStatus::Skipped | PieceStatus::Deals { copied: 0, .. })
        )
    }
}

/// Overall verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every attempted piece migrated or was skipped.
    Succeeded,
    /// Some pieces failed, others migrated or were skipped.
    PartialFailure,
    /// Nothing succeeded and at least one piece failed.
    Failed,
    /// The caller cancelled the run before it finished.
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::PartialFailure => "partial_failure",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A piece that failed, with its cause.
#[derive(Debug)]
pub struct PieceFailure {
    pub piece: PieceCid,
    pub error: MigrationError,
}

/// Summary of a migration run.
#[derive(Debug)]
pub struct MigrationReport {
    pub kind: MigrationKind,
    pub policy: ErrorPolicy,
    /// Pieces listed by the source.
    pub total_pieces: usize,
    /// Pieces whose transfer completed.
    pub migrated: usize,
    /// Pieces skipped by the idempotency gate.
    pub skipped: usize,
    /// Pieces never attempted because the run stopped first.
    pub not_attempted: usize,
    pub records_migrated: u64,
    pub deals_copied: usize,
    pub deals_already_present: usize,
    /// Failures in the order they were observed.
    pub failures: Vec<PieceFailure>,
    /// Set when the caller's token fired.
    pub cancelled: bool,
    pub duration_secs: f64,
}

impl MigrationReport {
    #[must_use]
    pub fn status(&self) -> RunStatus {
        if self.cancelled {
            RunStatus::Cancelled
        } else if self.failures.is_empty() {
            RunStatus::Succeeded
        } else if self.migrated + self.skipped > 0 {
            RunStatus::PartialFailure
        } else {
            RunStatus::Failed
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status() == RunStatus::Succeeded
    }

    #[must_use]
    pub fn first_error(&self) -> Option<&MigrationError> {
        self.failures.first().map(|f| &f.error)
    }

    /// Pieces that failed, in observation order.
    #[must_use]
    pub fn failed_pieces(&self) -> Vec<&PieceCid> {
        self.failures.iter().map(|f| &f.piece).collect()
    }
}
