//! `PostgreSQL`-backed implementation of [`DestinationStore`].
//!
//! Uses the sync `postgres` crate with a small set of `Mutex<Client>`
//! connections for thread safety. The `postgres` crate manages its own
//! internal tokio runtime, so this works from any thread, including the
//! engine's blocking pool, but a store must not be opened or dropped on
//! an async worker thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pieceport_types::{DealInfo, IndexRecord, IndexWriteAck, PieceCid, PieceMetadata};
use postgres::{Client, NoTls};

use crate::backend::{AckStream, DestinationStore, RecordStream};
use crate::error::{self, StoreError};
use crate::page::PagedRecords;
use crate::{DEFAULT_INSERT_CHUNK_SIZE, INDEX_PAGE_SIZE};

/// Idempotent DDL for piece tables (`PostgreSQL` dialect).
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS piece_meta (
    piece_cid TEXT PRIMARY KEY,
    indexed_at TEXT,
    complete_index BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS piece_records (
    id BIGSERIAL PRIMARY KEY,
    piece_cid TEXT NOT NULL,
    payload_cid TEXT NOT NULL,
    block_offset BIGINT NOT NULL,
    block_size BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_piece_records_piece ON piece_records (piece_cid, id);

CREATE TABLE IF NOT EXISTS piece_deals (
    id BIGSERIAL PRIMARY KEY,
    piece_cid TEXT NOT NULL,
    deal_uuid TEXT NOT NULL,
    deal_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_piece_deals_piece ON piece_deals (piece_cid, id);
";

/// `PostgreSQL`-backed destination store.
///
/// Create with [`PostgresStore::open`] providing a libpq-style
/// connection string (e.g. `"host=localhost dbname=lid user=postgres"`).
/// An index write holds one connection for its whole transaction; open
/// with [`PostgresStore::open_with_connections`] so concurrent writers
/// and point queries don't queue behind each other.
pub struct PostgresStore {
    clients: Vec<Mutex<Client>>,
    next: AtomicUsize,
    insert_chunk_size: usize,
}

impl PostgresStore {
    /// Connect, apply `statement_timeout` and initialize piece tables.
    ///
    /// `connstr` is a libpq-style connection string or `PostgreSQL` URI:
    /// - `"host=localhost port=5432 dbname=lid user=postgres"`
    /// - `"postgresql://postgres@localhost/lid"`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BackendContext`] if connection or DDL
    /// execution fails.
    pub fn open(connstr: &str, query_timeout: Option<Duration>) -> error::Result<Self> {
        Self::open_with_connections(connstr, query_timeout, 1)
    }

    /// Like [`open`](Self::open), holding `connections` (at least one)
    /// client sessions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BackendContext`] if any connection or the DDL
    /// fails.
    pub fn open_with_connections(
        connstr: &str,
        query_timeout: Option<Duration>,
        connections: usize,
    ) -> error::Result<Self> {
        let mut clients = Vec::with_capacity(connections.max(1));
        for _ in 0..connections.max(1) {
            clients.push(Mutex::new(Self::connect(connstr, query_timeout)?));
        }
        let store = Self {
            clients,
            next: AtomicUsize::new(0),
            insert_chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
        };
        store
            .lock_client()?
            .batch_execute(CREATE_TABLES)
            .map_err(|e| StoreError::backend_context("create tables", e))?;
        Ok(store)
    }

    fn connect(connstr: &str, query_timeout: Option<Duration>) -> error::Result<Client> {
        let mut client = Client::connect(connstr, NoTls)
            .map_err(|e| StoreError::backend_context("connect", e))?;
        if let Some(timeout) = query_timeout {
            client
                .batch_execute(&format!("SET statement_timeout = {}", timeout.as_millis()))
                .map_err(|e| StoreError::backend_context("set statement_timeout", e))?;
        }
        Ok(client)
    }

    /// Set how many records each [`IndexWriteAck`] covers.
    #[must_use]
    pub fn with_insert_chunk_size(mut self, chunk_size: usize) -> Self {
        self.insert_chunk_size = chunk_size.max(1);
        self
    }

    /// Take the first idle connection, or wait on one round-robin.
    fn lock_client(&self) -> error::Result<MutexGuard<'_, Client>> {
        let n = self.clients.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for i in 0..n {
            match self.clients[(start + i) % n].try_lock() {
                Ok(client) => return Ok(client),
                Err(TryLockError::WouldBlock) => {}
                Err(TryLockError::Poisoned(_)) => return Err(StoreError::LockPoisoned),
            }
        }
        self.clients[start % n]
            .lock()
            .map_err(|_| StoreError::LockPoisoned)
    }

    #[allow(clippy::cast_sign_loss)]
    fn fetch_page(
        &self,
        piece: &PieceCid,
        after_id: i64,
        limit: usize,
    ) -> error::Result<Vec<(i64, IndexRecord)>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut client = self.lock_client()?;
        let rows = client
            .query(
                "SELECT id, payload_cid, block_offset, block_size FROM piece_records \
                 WHERE piece_cid = $1 AND id > $2 ORDER BY id LIMIT $3",
                &[&piece.as_str(), &after_id, &limit],
            )
            .map_err(|e| StoreError::backend_context("get_index: query", e))?;
        Ok(rows
            .iter()
            .map(|row| {
                let id: i64 = row.get(0);
                let cid: String = row.get(1);
                let offset: i64 = row.get(2);
                let size: i64 = row.get(3);
                (id, IndexRecord::new(cid, offset as u64, size as u64))
            })
            .collect())
    }

    fn read_deals(&self, piece: &PieceCid) -> error::Result<Vec<DealInfo>> {
        let mut client = self.lock_client()?;
        let rows = client
            .query(
                "SELECT deal_json FROM piece_deals WHERE piece_cid = $1 ORDER BY id",
                &[&piece.as_str()],
            )
            .map_err(|e| StoreError::backend_context("get_piece_deals", e))?;
        rows.iter()
            .map(|row| {
                let json: String = row.get(0);
                serde_json::from_str(&json)
                    .map_err(|e| StoreError::Corrupt(format!("deal for piece {piece}: {e}")))
            })
            .collect()
    }

    #[allow(clippy::cast_possible_wrap)]
    fn write_index(
        &self,
        piece: &PieceCid,
        records: RecordStream<'_>,
        is_complete: bool,
        acks: &mut Vec<IndexWriteAck>,
    ) -> error::Result<()> {
        let mut client = self.lock_client()?;
        let mut tx = client
            .transaction()
            .map_err(|e| StoreError::backend_context("add_index: begin tx", e))?;
        tx.execute(
            "DELETE FROM piece_records WHERE piece_cid = $1",
            &[&piece.as_str()],
        )
        .map_err(|e| StoreError::backend_context("add_index: clear", e))?;
        let stmt = tx
            .prepare(
                "INSERT INTO piece_records (piece_cid, payload_cid, block_offset, block_size) \
                 VALUES ($1, $2, $3, $4)",
            )
            .map_err(|e| StoreError::backend_context("add_index: prepare", e))?;

        let mut pending = 0u64;
        for record in records {
            let record = record?;
            tx.execute(
                &stmt,
                &[
                    &piece.as_str(),
                    &record.cid,
                    &(record.offset as i64),
                    &(record.size as i64),
                ],
            )
            .map_err(|e| StoreError::backend_context("add_index: insert", e))?;
            pending += 1;
            if pending == self.insert_chunk_size as u64 {
                acks.push(IndexWriteAck::ok(pending));
                pending = 0;
            }
        }
        if pending > 0 {
            acks.push(IndexWriteAck::ok(pending));
        }

        tx.execute(
            "INSERT INTO piece_meta (piece_cid, indexed_at, complete_index) VALUES ($1, $2, $3) \
             ON CONFLICT (piece_cid) DO UPDATE SET indexed_at = $2, complete_index = $3",
            &[&piece.as_str(), &Utc::now().to_rfc3339(), &is_complete],
        )
        .map_err(|e| StoreError::backend_context("add_index: upsert meta", e))?;
        tx.commit()
            .map_err(|e| StoreError::backend_context("add_index: commit", e))
    }
}

impl DestinationStore for PostgresStore {
    fn is_indexed(&self, piece: &PieceCid) -> error::Result<bool> {
        let mut client = self.lock_client()?;
        let rows = client
            .query(
                "SELECT indexed_at IS NOT NULL FROM piece_meta WHERE piece_cid = $1",
                &[&piece.as_str()],
            )
            .map_err(|e| StoreError::backend_context("is_indexed", e))?;
        Ok(rows.first().is_some_and(|row| row.get::<_, bool>(0)))
    }

    fn add_index<'a>(
        &'a self,
        piece: &PieceCid,
        records: RecordStream<'a>,
        is_complete: bool,
    ) -> AckStream<'a> {
        let mut acks = Vec::new();
        if let Err(err) = self.write_index(piece, records, is_complete, &mut acks) {
            acks.push(IndexWriteAck::failed(err.to_string()));
        }
        Box::new(acks.into_iter())
    }

    fn add_deal_for_piece(&self, piece: &PieceCid, deal: &DealInfo) -> error::Result<()> {
        let deal_json = serde_json::to_string(deal).map_err(StoreError::backend)?;
        let mut client = self.lock_client()?;
        let mut tx = client
            .transaction()
            .map_err(|e| StoreError::backend_context("add_deal: begin tx", e))?;
        tx.execute(
            "INSERT INTO piece_meta (piece_cid) VALUES ($1) ON CONFLICT (piece_cid) DO NOTHING",
            &[&piece.as_str()],
        )
        .map_err(|e| StoreError::backend_context("add_deal: meta", e))?;
        tx.execute(
            "INSERT INTO piece_deals (piece_cid, deal_uuid, deal_json) VALUES ($1, $2, $3)",
            &[&piece.as_str(), &deal.deal_uuid, &deal_json],
        )
        .map_err(|e| StoreError::backend_context("add_deal: insert", e))?;
        tx.commit()
            .map_err(|e| StoreError::backend_context("add_deal: commit", e))
    }

    fn get_piece_deals(&self, piece: &PieceCid) -> error::Result<Vec<DealInfo>> {
        self.read_deals(piece)
    }

    fn get_index(&self, piece: &PieceCid) -> error::Result<RecordStream<'_>> {
        let piece = piece.clone();
        Ok(Box::new(PagedRecords::new(
            INDEX_PAGE_SIZE,
            move |after, limit| self.fetch_page(&piece, after, limit),
        )))
    }

    fn get_piece_metadata(&self, piece: &PieceCid) -> error::Result<PieceMetadata> {
        let row = {
            let mut client = self.lock_client()?;
            client
                .query_opt(
                    "SELECT indexed_at, complete_index FROM piece_meta WHERE piece_cid = $1",
                    &[&piece.as_str()],
                )
                .map_err(|e| StoreError::backend_context("get_piece_metadata", e))?
        };
        let Some(row) = row else {
            return Err(StoreError::NotFound(piece.clone()));
        };
        let indexed_at: Option<String> = row.get(0);
        let indexed_at = indexed_at
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| StoreError::Corrupt(format!("indexed_at '{raw}': {e}")))
            })
            .transpose()?;
        Ok(PieceMetadata {
            piece_cid: piece.clone(),
            indexed_at,
            complete_index: row.get(1),
            deals: self.read_deals(piece)?,
        })
    }
}
