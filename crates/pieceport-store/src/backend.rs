//! Store contracts consumed by the migration engine.
//!
//! Both traits are synchronous and must be `Send + Sync` so the engine
//! can hold them behind `Arc<dyn …>` and call them from its blocking
//! pool. Model types live in [`pieceport_types`].

use pieceport_types::{DealInfo, IndexRecord, IndexWriteAck, PieceCid, PieceMetadata};

use crate::error;

/// Lazy, finite sequence of index records.
///
/// Ends normally or after yielding its first error; not resumable.
pub type RecordStream<'a> = Box<dyn Iterator<Item = error::Result<IndexRecord>> + Send + 'a>;

/// Per-chunk acknowledgements of an index write.
pub type AckStream<'a> = Box<dyn Iterator<Item = IndexWriteAck> + Send + 'a>;

/// Read-only access to the legacy store.
pub trait SourceStore: Send + Sync {
    /// List every piece the store knows about.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn list_pieces(&self) -> error::Result<Vec<PieceCid>>;

    /// Whether the stored index for `piece` is known to be complete.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`](crate::StoreError::NotFound) for
    /// unknown pieces, or a backend error on storage failure.
    fn is_complete_index(&self, piece: &PieceCid) -> error::Result<bool>;

    /// Open a lazy stream over the index records of `piece`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) if the stream can't be
    /// opened. Errors while iterating are yielded by the stream itself.
    fn get_index(&self, piece: &PieceCid) -> error::Result<RecordStream<'_>>;

    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`](crate::StoreError::NotFound) for
    /// unknown pieces, or a backend error on storage failure.
    fn get_piece_metadata(&self, piece: &PieceCid) -> error::Result<PieceMetadata>;

    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn get_piece_deals(&self, piece: &PieceCid) -> error::Result<Vec<DealInfo>>;
}

/// Write and read-back access to the destination store.
pub trait DestinationStore: Send + Sync {
    /// Whether an index has already been written for `piece`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn is_indexed(&self, piece: &PieceCid) -> error::Result<bool>;

    /// Write the index of `piece` from `records`, tagging it with
    /// `is_complete`.
    ///
    /// One ack is yielded per internal chunk. The whole call is atomic:
    /// if `records` yields an error or any chunk fails, nothing from this
    /// call is kept and the final ack carries the error.
    fn add_index<'a>(
        &'a self,
        piece: &PieceCid,
        records: RecordStream<'a>,
        is_complete: bool,
    ) -> AckStream<'a>;

    /// Append one deal to `piece`. Deals are not deduplicated here.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn add_deal_for_piece(&self, piece: &PieceCid, deal: &DealInfo) -> error::Result<()>;

    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn get_piece_deals(&self, piece: &PieceCid) -> error::Result<Vec<DealInfo>>;

    /// # Errors
    ///
    /// See [`SourceStore::get_index`].
    fn get_index(&self, piece: &PieceCid) -> error::Result<RecordStream<'_>>;

    /// # Errors
    ///
    /// See [`SourceStore::get_piece_metadata`].
    fn get_piece_metadata(&self, piece: &PieceCid) -> error::Result<PieceMetadata>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traits_are_object_safe() {
        fn _assert_source(_: &dyn SourceStore) {}
        fn _assert_destination(_: &dyn DestinationStore) {}
    }
}
