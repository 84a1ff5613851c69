//! Migration engine: moves piece indices and deals from a legacy store
//! into a destination store.
//!
//! The entry points are [`migrate_index`], [`migrate_deals`] and
//! [`verify_piece`]. All three consume the stores only through the
//! [`pieceport_store::SourceStore`] / [`pieceport_store::DestinationStore`]
//! contracts.

pub mod aggregate;
pub mod config;
pub mod context;
pub(crate) mod deal;
pub(crate) mod enumerate;
pub mod errors;
pub(crate) mod gate;
pub(crate) mod index;
pub mod orchestrator;
pub mod outcome;
pub mod verify;

// Re-export public API for convenience
pub use aggregate::{ErrorAggregator, ErrorPolicy};
pub use context::MigrationContext;
pub use errors::MigrationError;
pub use orchestrator::{migrate_deals, migrate_index, MigrationOptions};
pub use outcome::{MigrationKind, MigrationOutcome, MigrationReport, PieceStatus, RunStatus};
pub use verify::{verify_piece, StoreSide, StoreSnapshot, VerifyReport};
