//! Deal transfer for a single piece.

use std::collections::HashSet;
use std::sync::Arc;

use pieceport_store::{DestinationStore, SourceStore};
use pieceport_types::PieceCid;

use crate::context::MigrationContext;
use crate::errors::MigrationError;
use crate::outcome::PieceStatus;

/// Copy the deals of `piece` one at a time, in source order.
///
/// Deals whose `deal_uuid` the destination already lists for the piece
/// are left alone. The first failed write stops the remaining deals of
/// the piece; deals written before it stay written.
pub(crate) async fn migrate_piece(
    ctx: &MigrationContext,
    source: &Arc<dyn SourceStore>,
    dest: &Arc<dyn DestinationStore>,
    piece: &PieceCid,
) -> Result<PieceStatus, MigrationError> {
    let deals = {
        let source = Arc::clone(source);
        let cid = piece.clone();
        ctx.query(move || source.get_piece_deals(&cid))
            .await?
            .map_err(|source| MigrationError::SourceRead {
                piece: piece.clone(),
                source,
            })?
    };

    let present: HashSet<String> = {
        let dest = Arc::clone(dest);
        let cid = piece.clone();
        ctx.query(move || dest.get_piece_deals(&cid))
            .await?
            .map_err(|source| MigrationError::IdempotencyCheck {
                piece: piece.clone(),
                source,
            })?
            .into_iter()
            .map(|deal| deal.deal_uuid)
            .collect()
    };

    let mut copied = 0usize;
    let mut already_present = 0usize;
    for deal in deals {
        if present.contains(&deal.deal_uuid) {
            tracing::debug!(piece = %piece, deal = %deal.deal_uuid, "Deal already at destination");
            already_present += 1;
            continue;
        }
        let dest = Arc::clone(dest);
        let cid = piece.clone();
        let uuid = deal.deal_uuid.clone();
        ctx.query(move || dest.add_deal_for_piece(&cid, &deal))
            .await?
            .map_err(|source| MigrationError::DestinationWrite {
                piece: piece.clone(),
                source,
            })?;
        tracing::debug!(piece = %piece, deal = %uuid, "Copied deal");
        copied += 1;
    }

    tracing::debug!(piece = %piece, deals = copied, already_present, "Migrated piece deals");
    Ok(PieceStatus::Deals {
        copied,
        already_present,
    })
}
