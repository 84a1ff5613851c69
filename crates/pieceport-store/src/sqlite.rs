//! `SQLite`-backed implementation of both store contracts.
//!
//! This is the embedded store used by deployed nodes. Writes go through a
//! single `Mutex<Connection>`; a store opened with
//! [`SqliteStore::open_concurrent`] also holds a WAL reader connection for
//! queries.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pieceport_types::{DealInfo, IndexRecord, IndexWriteAck, PieceCid, PieceMetadata};
use rusqlite::{Connection, OptionalExtension};

use crate::backend::{AckStream, DestinationStore, RecordStream, SourceStore};
use crate::error::{self, StoreError};
use crate::page::PagedRecords;
use crate::{DEFAULT_INSERT_CHUNK_SIZE, INDEX_PAGE_SIZE};

/// Location of the database file inside a node repo directory.
pub const REPO_DB_PATH: &str = "lid/pieces.sqlite";

/// Idempotent DDL for piece tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS piece_meta (
    piece_cid TEXT PRIMARY KEY,
    indexed_at TEXT,
    complete_index INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS piece_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    piece_cid TEXT NOT NULL,
    payload_cid TEXT NOT NULL,
    block_offset INTEGER NOT NULL,
    block_size INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_piece_records_piece ON piece_records (piece_cid, id);

CREATE TABLE IF NOT EXISTS piece_deals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    piece_cid TEXT NOT NULL,
    deal_uuid TEXT NOT NULL,
    deal_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_piece_deals_piece ON piece_deals (piece_cid, id);
";

/// `SQLite`-backed piece store.
///
/// Create with [`SqliteStore::open`] / [`SqliteStore::open_repo`] for
/// file-backed persistence or [`SqliteStore::in_memory`] for tests.
///
/// [`DestinationStore::add_index`] holds the write connection for the
/// whole call, so the same instance must not also be the source feeding
/// it. Without a reader connection every query waits for that call too.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
    insert_chunk_size: usize,
}

/// How long a connection waits on a locked database file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

impl SqliteStore {
    /// Open or create a database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory can't be created,
    /// or [`StoreError::Backend`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(StoreError::backend)?;
        Self::init(conn)
    }

    /// Open the database that lives inside a node repo directory.
    ///
    /// # Errors
    ///
    /// See [`SqliteStore::open`].
    pub fn open_repo(repo_dir: &Path) -> error::Result<Self> {
        Self::open(&repo_dir.join(REPO_DB_PATH))
    }

    /// Open `path` in WAL mode with a second connection for reads, so
    /// gate checks, metadata and index reads see the last committed state
    /// instead of waiting behind a streaming [`DestinationStore::add_index`].
    ///
    /// Switches the database file to WAL for good; meant for destinations.
    ///
    /// # Errors
    ///
    /// See [`SqliteStore::open`]; also fails if WAL can't be enabled.
    pub fn open_concurrent(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(StoreError::backend)?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StoreError::backend_context("busy timeout", e))?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| StoreError::backend_context("enable WAL", e))?;
        if !mode.eq_ignore_ascii_case("wal") {
            return Err(StoreError::Corrupt(format!(
                "{} refused WAL journal mode (got {mode})",
                path.display()
            )));
        }
        let mut store = Self::init(conn)?;

        let reader = Connection::open(path).map_err(StoreError::backend)?;
        reader
            .busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StoreError::backend_context("busy timeout", e))?;
        store.reader = Some(Mutex::new(reader));
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the database can't be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::backend)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| StoreError::backend_context("create tables", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
            reader: None,
            insert_chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
        })
    }

    /// Set how many records each [`IndexWriteAck`] covers.
    #[must_use]
    pub fn with_insert_chunk_size(mut self, chunk_size: usize) -> Self {
        self.insert_chunk_size = chunk_size.max(1);
        self
    }

    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Connection for read-only statements.
    fn lock_reader(&self) -> error::Result<MutexGuard<'_, Connection>> {
        match &self.reader {
            Some(reader) => reader.lock().map_err(|_| StoreError::LockPoisoned),
            None => self.lock_conn(),
        }
    }

    fn parse_piece(raw: &str) -> error::Result<PieceCid> {
        PieceCid::parse(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn parse_indexed_at(raw: Option<String>) -> error::Result<Option<DateTime<Utc>>> {
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| StoreError::Corrupt(format!("indexed_at '{s}': {e}")))
        })
        .transpose()
    }

    #[allow(clippy::cast_sign_loss)]
    fn fetch_page(
        &self,
        piece: &PieceCid,
        after_id: i64,
        limit: usize,
    ) -> error::Result<Vec<(i64, IndexRecord)>> {
        let conn = self.lock_reader()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, payload_cid, block_offset, block_size FROM piece_records \
                 WHERE piece_cid = ?1 AND id > ?2 ORDER BY id LIMIT ?3",
            )
            .map_err(|e| StoreError::backend_context("get_index: prepare", e))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(rusqlite::params![piece.as_str(), after_id, limit], |row| {
                let id: i64 = row.get(0)?;
                let cid: String = row.get(1)?;
                let offset: i64 = row.get(2)?;
                let size: i64 = row.get(3)?;
                Ok((id, IndexRecord::new(cid, offset as u64, size as u64)))
            })
            .map_err(|e| StoreError::backend_context("get_index: query", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::backend_context("get_index: row", e))
    }

    fn read_deals(&self, piece: &PieceCid) -> error::Result<Vec<DealInfo>> {
        let conn = self.lock_reader()?;
        let mut stmt = conn
            .prepare_cached("SELECT deal_json FROM piece_deals WHERE piece_cid = ?1 ORDER BY id")
            .map_err(|e| StoreError::backend_context("get_piece_deals: prepare", e))?;
        let raw = stmt
            .query_map([piece.as_str()], |row| row.get::<_, String>(0))
            .map_err(|e| StoreError::backend_context("get_piece_deals: query", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::backend_context("get_piece_deals: row", e))?;
        raw.iter()
            .map(|json| {
                serde_json::from_str(json)
                    .map_err(|e| StoreError::Corrupt(format!("deal for piece {piece}: {e}")))
            })
            .collect()
    }

    fn read_metadata(&self, piece: &PieceCid) -> error::Result<PieceMetadata> {
        let row = {
            let conn = self.lock_reader()?;
            conn.query_row(
                "SELECT indexed_at, complete_index FROM piece_meta WHERE piece_cid = ?1",
                [piece.as_str()],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()
            .map_err(|e| StoreError::backend_context("get_piece_metadata", e))?
        };
        let Some((indexed_at, complete_index)) = row else {
            return Err(StoreError::NotFound(piece.clone()));
        };
        Ok(PieceMetadata {
            piece_cid: piece.clone(),
            indexed_at: Self::parse_indexed_at(indexed_at)?,
            complete_index,
            deals: self.read_deals(piece)?,
        })
    }

    #[allow(clippy::cast_possible_wrap)]
    fn write_index(
        &self,
        piece: &PieceCid,
        records: RecordStream<'_>,
        is_complete: bool,
        acks: &mut Vec<IndexWriteAck>,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StoreError::backend_context("add_index: begin tx", e))?;
        tx.execute(
            "DELETE FROM piece_records WHERE piece_cid = ?1",
            [piece.as_str()],
        )
        .map_err(|e| StoreError::backend_context("add_index: clear", e))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO piece_records (piece_cid, payload_cid, block_offset, block_size) \
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(|e| StoreError::backend_context("add_index: prepare", e))?;
            let mut pending = 0u64;
            for record in records {
                let record = record?;
                stmt.execute(rusqlite::params![
                    piece.as_str(),
                    record.cid,
                    record.offset as i64,
                    record.size as i64,
                ])
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
        }
        tx.execute(
            "INSERT INTO piece_meta (piece_cid, indexed_at, complete_index) VALUES (?1, ?2, ?3) \
             ON CONFLICT(piece_cid) DO UPDATE SET indexed_at = ?2, complete_index = ?3",
            rusqlite::params![piece.as_str(), Utc::now().to_rfc3339(), is_complete],
        )
        .map_err(|e| StoreError::backend_context("add_index: upsert meta", e))?;
        tx.commit()
            .map_err(|e| StoreError::backend_context("add_index: commit", e))?;
        Ok(())
    }
}

impl SourceStore for SqliteStore {
    fn list_pieces(&self) -> error::Result<Vec<PieceCid>> {
        let conn = self.lock_reader()?;
        let mut stmt = conn
            .prepare("SELECT piece_cid FROM piece_meta ORDER BY piece_cid")
            .map_err(|e| StoreError::backend_context("list_pieces: prepare", e))?;
        let raw = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StoreError::backend_context("list_pieces: query", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::backend_context("list_pieces: row", e))?;
        raw.iter().map(|s| Self::parse_piece(s)).collect()
    }

    fn is_complete_index(&self, piece: &PieceCid) -> error::Result<bool> {
        let conn = self.lock_reader()?;
        conn.query_row(
            "SELECT complete_index FROM piece_meta WHERE piece_cid = ?1",
            [piece.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| StoreError::backend_context("is_complete_index", e))?
        .ok_or_else(|| StoreError::NotFound(piece.clone()))
    }

    fn get_index(&self, piece: &PieceCid) -> error::Result<RecordStream<'_>> {
        let piece = piece.clone();
        Ok(Box::new(PagedRecords::new(
            INDEX_PAGE_SIZE,
            move |after, limit| self.fetch_page(&piece, after, limit),
        )))
    }

    fn get_piece_metadata(&self, piece: &PieceCid) -> error::Result<PieceMetadata> {
        self.read_metadata(piece)
    }

    fn get_piece_deals(&self, piece: &PieceCid) -> error::Result<Vec<DealInfo>> {
        self.read_deals(piece)
    }
}

impl DestinationStore for SqliteStore {
    fn is_indexed(&self, piece: &PieceCid) -> error::Result<bool> {
        let conn = self.lock_reader()?;
        let indexed: Option<bool> = conn
            .query_row(
                "SELECT indexed_at IS NOT NULL FROM piece_meta WHERE piece_cid = ?1",
                [piece.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::backend_context("is_indexed", e))?;
        Ok(indexed.unwrap_or(false))
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
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StoreError::backend_context("add_deal: begin tx", e))?;
        tx.execute(
            "INSERT OR IGNORE INTO piece_meta (piece_cid) VALUES (?1)",
            [piece.as_str()],
        )
        .map_err(|e| StoreError::backend_context("add_deal: meta", e))?;
        tx.execute(
            "INSERT INTO piece_deals (piece_cid, deal_uuid, deal_json) VALUES (?1, ?2, ?3)",
            rusqlite::params![piece.as_str(), deal.deal_uuid, deal_json],
        )
        .map_err(|e| StoreError::backend_context("add_deal: insert", e))?;
        tx.commit()
            .map_err(|e| StoreError::backend_context("add_deal: commit", e))
    }

    fn get_piece_deals(&self, piece: &PieceCid) -> error::Result<Vec<DealInfo>> {
        self.read_deals(piece)
    }

    fn get_index(&self, piece: &PieceCid) -> error::Result<RecordStream<'_>> {
        SourceStore::get_index(self, piece)
    }

    fn get_piece_metadata(&self, piece: &PieceCid) -> error::Result<PieceMetadata> {
        self.read_metadata(piece)
    }
}
