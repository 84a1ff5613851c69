//! Migration error taxonomy.

use pieceport_store::StoreError;
use pieceport_types::PieceCid;

use crate::verify::StoreSide;

/// Errors raised while migrating or verifying pieces.
///
/// `Enumeration` and `Infrastructure` are fatal to a whole run; the
/// piece-scoped variants end only that piece's transfer and are routed
/// through the [`ErrorAggregator`](crate::ErrorAggregator).
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// The source store could not list its pieces.
    #[error("listing source pieces: {0}")]
    Enumeration(#[source] StoreError),

    /// The destination could not say whether the piece was migrated.
    #[error("checking migration state of piece {piece}: {source}")]
    IdempotencyCheck { piece: PieceCid, source: StoreError },

    /// Reading the index, metadata or deals of a piece from the source failed.
    #[error("reading piece {piece} from source: {source}")]
    SourceRead { piece: PieceCid, source: StoreError },

    /// The destination rejected an index chunk or a deal.
    #[error("writing piece {piece} to destination: {source}")]
    DestinationWrite { piece: PieceCid, source: StoreError },

    /// One of the stores was unreadable during a verification.
    #[error("verifying piece {piece}: {store} store unreadable: {source}")]
    VerificationRead {
        piece: PieceCid,
        store: StoreSide,
        source: StoreError,
    },

    /// The run's cancellation token fired.
    #[error("migration cancelled")]
    Cancelled,

    /// Worker pool or task failure (panic, closed semaphore).
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl MigrationError {
    /// The piece this error is scoped to, if any.
    #[must_use]
    pub fn piece(&self) -> Option<&PieceCid> {
        match self {
            Self::IdempotencyCheck { piece, .. }
            | Self::SourceRead { piece, .. }
            | Self::DestinationWrite { piece, .. }
            | Self::VerificationRead { piece, .. } => Some(piece),
            Self::Enumeration(_) | Self::Cancelled | Self::Infrastructure(_) => None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short label for structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Enumeration(_) => "enumeration",
            Self::IdempotencyCheck { .. } => "idempotency_check",
            Self::SourceRead { .. } => "source_read",
            Self::DestinationWrite { .. } => "destination_write",
            Self::VerificationRead { .. } => "verification_read",
            Self::Cancelled => "cancelled",
            Self::Infrastructure(_) => "infrastructure",
        }
    }
}
