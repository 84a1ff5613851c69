//! Index transfer for a single piece.
//!
//! A producer on the blocking pool pulls records from the source stream
//! into a bounded channel; a writer on the blocking pool hands the
//! receiving end to the destination's `add_index` and consumes its acks.
//! Reading and writing overlap, but the destination applies the whole
//! call atomically, so a producer failure leaves nothing behind.

use std::sync::Arc;

use pieceport_store::{DestinationStore, SourceStore, StoreError};
use pieceport_types::{IndexRecord, PieceCid};
use tokio::sync::mpsc;

use crate::context::MigrationContext;
use crate::errors::MigrationError;
use crate::gate;
use crate::outcome::PieceStatus;

/// Unit of the producer-to-writer channel.
#[derive(Debug)]
enum RecordFrame {
    Record(IndexRecord),
    /// The producer gave up; the destination must discard the call.
    Interrupted(String),
    EndStream,
}

/// Receiving half of the record channel, seen as a blocking iterator.
///
/// A channel that closes without [`RecordFrame::EndStream`] means the
/// producer died, and is surfaced as an interruption.
struct ChannelRecords {
    rx: mpsc::Receiver<RecordFrame>,
    done: bool,
}

impl Iterator for ChannelRecords {
    type Item = pieceport_store::Result<IndexRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = match self.rx.blocking_recv() {
            Some(RecordFrame::Record(record)) => return Some(Ok(record)),
            Some(RecordFrame::EndStream) => None,
            Some(RecordFrame::Interrupted(reason)) => Some(Err(StoreError::Interrupted(reason))),
            None => Some(Err(StoreError::Interrupted(
                "record producer exited before end of stream".into(),
            ))),
        };
        self.done = true;
        item
    }
}

/// Migrate the index of `piece`, unless the destination already has it.
pub(crate) async fn migrate_piece(
    ctx: &MigrationContext,
    source: &Arc<dyn SourceStore>,
    dest: &Arc<dyn DestinationStore>,
    piece: &PieceCid,
    channel_capacity: usize,
) -> Result<PieceStatus, MigrationError> {
    if gate::already_migrated(ctx, dest, piece).await? {
        tracing::debug!(piece = %piece, "Index already present at destination, skipping");
        return Ok(PieceStatus::Skipped);
    }

    let is_complete = {
        let source = Arc::clone(source);
        let cid = piece.clone();
        ctx.query(move || source.is_complete_index(&cid))
            .await?
            .map_err(|source| MigrationError::SourceRead {
                piece: piece.clone(),
                source,
            })?
    };

    let (tx, rx) = mpsc::channel::<RecordFrame>(channel_capacity.max(1));

    let producer = {
        let source = Arc::clone(source);
        let cid = piece.clone();
        let cancel = ctx.cancel_token().clone();
        move || produce_records(source.as_ref(), &cid, &tx, || cancel.is_cancelled())
    };

    let writer = {
        let dest = Arc::clone(dest);
        let cid = piece.clone();
        move || -> pieceport_store::Result<u64> {
            let mut written = 0u64;
            for ack in dest.add_index(&cid, Box::new(ChannelRecords { rx, done: false }), is_complete) {
                if ack.is_error() {
                    return Err(StoreError::Rejected(ack.error));
                }
                written += ack.records;
            }
            Ok(written)
        }
    };

    let (produced, written) = tokio::join!(ctx.blocking(producer), ctx.blocking(writer));
    let (produced, written) = (produced?, written?);

    match (produced, written) {
        // The producer stopped on the token; the destination discarded the call.
        (Err(StoreError::Interrupted(_)), _) if ctx.is_cancelled() => {
            Err(MigrationError::Cancelled)
        }
        (Err(source), _) => Err(MigrationError::SourceRead {
            piece: piece.clone(),
            source,
        }),
        (Ok(_), Err(source)) => Err(MigrationError::DestinationWrite {
            piece: piece.clone(),
            source,
        }),
        (Ok(read), Ok(records)) => {
            tracing::debug!(
                piece = %piece,
                records,
                read,
                complete = is_complete,
                "Migrated piece index"
            );
            Ok(PieceStatus::Indexed { records })
        }
    }
}

/// Push every record of `piece` into `tx`, returning how many were sent.
///
/// A clean end is marked with [`RecordFrame::EndStream`]. On a source
/// error or cancellation the writer is sent [`RecordFrame::Interrupted`]
/// so the destination discards the call, and the cause is returned. If
/// the writer hangs up first, the records sent so far are reported and
/// the writer's own error decides the outcome.
fn produce_records(
    source: &dyn SourceStore,
    piece: &PieceCid,
    tx: &mpsc::Sender<RecordFrame>,
    is_cancelled: impl Fn() -> bool,
) -> pieceport_store::Result<u64> {
    let interrupt = |err: StoreError| {
        let _ = tx.blocking_send(RecordFrame::Interrupted(err.to_string()));
        Err(err)
    };

    let records = match source.get_index(piece) {
        Ok(records) => records,
        Err(err) => return interrupt(err),
    };

    let mut sent = 0u64;
    for item in records {
        if is_cancelled() {
            return interrupt(StoreError::Interrupted("migration cancelled".into()));
        }
        match item {
            Ok(record) => {
                if tx.blocking_send(RecordFrame::Record(record)).is_err() {
                    return Ok(sent);
                }
                sent += 1;
            }
            Err(err) => return interrupt(err),
        }
    }
    let _ = tx.blocking_send(RecordFrame::EndStream);
    Ok(sent)
}
