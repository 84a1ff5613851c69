//! Storage deal metadata attached to a piece.

use serde::{Deserialize, Serialize};

/// One storage deal referencing a piece.
///
/// `deal_uuid` identifies the deal across stores and is the key used to
/// skip deals that were already copied by an earlier run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealInfo {
    pub deal_uuid: String,
    #[serde(default)]
    pub is_legacy: bool,
    pub chain_deal_id: u64,
    pub miner_addr: String,
    pub sector_id: u64,
    pub piece_offset: u64,
    pub piece_length: u64,
    pub car_length: u64,
    #[serde(default)]
    pub is_direct_deal: bool,
}
