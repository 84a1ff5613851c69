//! Piece enumeration.

use std::sync::Arc;

use pieceport_store::SourceStore;
use pieceport_types::PieceCid;

use crate::context::MigrationContext;
use crate::errors::MigrationError;

/// List every piece known to `source`, in one blocking call.
///
/// Any failure is fatal to the run: nothing may be dispatched without a
/// complete piece list.
pub(crate) async fn list_all(
    ctx: &MigrationContext,
    source: &Arc<dyn SourceStore>,
) -> Result<Vec<PieceCid>, MigrationError> {
    let source = Arc::clone(source);
    let pieces = ctx
        .blocking(move || source.list_pieces())
        .await?
        .map_err(MigrationError::Enumeration)?;
    tracing::info!(pieces = pieces.len(), "Enumerated source pieces");
    Ok(pieces)
}
