//! Read-only comparison of one piece across both stores.

use std::collections::BTreeSet;
use std::sync::Arc;

use pieceport_store::{DestinationStore, RecordStream, SourceStore, StoreError};
use pieceport_types::{PieceCid, PieceMetadata};

use crate::context::MigrationContext;
use crate::errors::MigrationError;

/// Which store a verification read came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSide {
    Source,
    Destination,
}

impl StoreSide {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Destination => "destination",
        }
    }
}

impl std::fmt::Display for StoreSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one store holds for a piece.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    /// Number of index records the stream yielded.
    pub records: u64,
    pub metadata: PieceMetadata,
}

/// Both stores' view of a piece, side by side.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyReport {
    pub piece: PieceCid,
    pub source: StoreSnapshot,
    pub destination: StoreSnapshot,
}

impl VerifyReport {
    #[must_use]
    pub fn counts_match(&self) -> bool {
        self.source.records == self.destination.records
    }

    /// Completeness flag and deal set agree. Index timestamps are
    /// store-local and not compared.
    #[must_use]
    pub fn metadata_match(&self) -> bool {
        let deal_ids = |meta: &PieceMetadata| -> BTreeSet<String> {
            meta.deals.iter().map(|d| d.deal_uuid.clone()).collect()
        };
        self.source.metadata.complete_index == self.destination.metadata.complete_index
            && deal_ids(&self.source.metadata) == deal_ids(&self.destination.metadata)
    }
}

fn drain(records: RecordStream<'_>) -> pieceport_store::Result<u64> {
    let mut count = 0u64;
    for record in records {
        record?;
        count += 1;
    }
    Ok(count)
}

fn log_snapshot(piece: &PieceCid, side: StoreSide, snapshot: &StoreSnapshot) {
    let meta = &snapshot.metadata;
    tracing::info!(
        piece = %piece,
        store = %side,
        records = snapshot.records,
        complete = meta.complete_index,
        indexed_at = ?meta.indexed_at,
        deals = meta.deals.len(),
        "Piece snapshot"
    );
}

/// Read `piece` from the source, then from the destination, and report
/// both. Nothing is written to either store.
///
/// # Errors
///
/// Returns [`MigrationError::VerificationRead`] naming the store whose
/// index or metadata could not be read, or [`MigrationError::Cancelled`].
pub async fn verify_piece(
    ctx: &MigrationContext,
    source: Arc<dyn SourceStore>,
    dest: Arc<dyn DestinationStore>,
    piece: &PieceCid,
) -> Result<VerifyReport, MigrationError> {
    let read_err = move |store: StoreSide| {
        move |source: StoreError| MigrationError::VerificationRead {
            piece: piece.clone(),
            store,
            source,
        }
    };

    let cid = piece.clone();
    let source_snapshot = ctx
        .blocking(move || -> pieceport_store::Result<StoreSnapshot> {
            let records = drain(source.get_index(&cid)?)?;
            let metadata = source.get_piece_metadata(&cid)?;
            Ok(StoreSnapshot { records, metadata })
        })
        .await?
        .map_err(read_err(StoreSide::Source))?;
    log_snapshot(piece, StoreSide::Source, &source_snapshot);

    let cid = piece.clone();
    let dest_snapshot = ctx
        .blocking(move || -> pieceport_store::Result<StoreSnapshot> {
            let records = drain(dest.get_index(&cid)?)?;
            let metadata = dest.get_piece_metadata(&cid)?;
            Ok(StoreSnapshot { records, metadata })
        })
        .await?
        .map_err(read_err(StoreSide::Destination))?;
    log_snapshot(piece, StoreSide::Destination, &dest_snapshot);

    let report = VerifyReport {
        piece: piece.clone(),
        source: source_snapshot,
        destination: dest_snapshot,
    };
    tracing::info!(
        piece = %piece,
        counts_match = report.counts_match(),
        metadata_match = report.metadata_match(),
        "Verified piece"
    );
    Ok(report)
}
