//! Store error types.

use pieceport_types::PieceCid;

/// Errors produced by [`SourceStore`](crate::SourceStore) and
/// [`DestinationStore`](crate::DestinationStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),

    /// Database failure with the operation that raised it.
    #[error("{context}: {source}")]
    BackendContext {
        context: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// File-system I/O failure (e.g. creating the repo directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The store has no entry for the piece.
    #[error("piece {0} not found")]
    NotFound(PieceCid),

    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The destination refused a write (e.g. an ack carrying an error).
    #[error("write rejected: {0}")]
    Rejected(String),

    /// A record stream was cut short by its producer.
    #[error("stream interrupted: {0}")]
    Interrupted(String),

    /// A store call exceeded the configured query timeout.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }

    pub fn backend_context(
        context: &'static str,
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::BackendContext {
            context,
            source: Box::new(err),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StoreError>;
