//! Store contracts and backends for piece index migration.
//!
//! Provides the read-only [`SourceStore`] and the writable
//! [`DestinationStore`] traits, a [`SqliteStore`] implementing both
//! (the embedded legacy store) and a [`PostgresStore`] implementing the
//! destination side.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
mod page;
pub mod postgres;
pub mod sqlite;

pub use backend::{AckStream, DestinationStore, RecordStream, SourceStore};
pub use error::{Result, StoreError};
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// Records per acknowledged chunk when a backend isn't told otherwise.
pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 1_000;

/// Rows fetched per page by the lazy index readers.
pub(crate) const INDEX_PAGE_SIZE: usize = 1_024;
