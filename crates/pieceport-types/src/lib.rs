//! Shared model types for piece index and deal migration.
//!
//! Kept in their own crate so the store backends, the migration engine
//! and the CLI can share them without circular dependencies.

#![warn(clippy::pedantic)]

pub mod deal;
pub mod index;
pub mod metadata;
pub mod piece;

pub use deal::DealInfo;
pub use index::{IndexRecord, IndexWriteAck};
pub use metadata::PieceMetadata;
pub use piece::{PieceCid, PieceCidError};
