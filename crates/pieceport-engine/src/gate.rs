//! Idempotency gate consulted before any source access.

use std::sync::Arc;

use pieceport_store::DestinationStore;
use pieceport_types::PieceCid;

use crate::context::MigrationContext;
use crate::errors::MigrationError;

/// Whether `piece` already has an index at the destination.
///
/// A failed check is reported as [`MigrationError::IdempotencyCheck`],
/// never read as "not migrated".
pub(crate) async fn already_migrated(
    ctx: &MigrationContext,
    dest: &Arc<dyn DestinationStore>,
    piece: &PieceCid,
) -> Result<bool, MigrationError> {
    let dest = Arc::clone(dest);
    let cid = piece.clone();
    ctx.query(move || dest.is_indexed(&cid))
        .await?
        .map_err(|source| MigrationError::IdempotencyCheck {
            piece: piece.clone(),
            source,
        })
}
