//! Per-piece metadata as reported by a store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deal::DealInfo;
use crate::piece::PieceCid;

/// Metadata a store keeps alongside a piece's index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceMetadata {
    pub piece_cid: PieceCid,
    /// When the index was (last) written. `None` if the piece has deals
    /// but no index yet.
    pub indexed_at: Option<DateTime<Utc>>,
    /// Whether the stored index is known to be complete.
    pub complete_index: bool,
    pub deals: Vec<DealInfo>,
}

impl PieceMetadata {
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.indexed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unindexed_metadata_roundtrips() {
        let meta = PieceMetadata {
            piece_cid: PieceCid::parse("bafyabc").unwrap(),
            indexed_at: None,
            complete_index: false,
            deals: vec![],
        };
        assert!(!meta.is_indexed());
        let json = serde_json::to_string(&meta).unwrap();
        let back: PieceMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
