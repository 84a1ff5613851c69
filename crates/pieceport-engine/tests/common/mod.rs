//! Shared fixtures: seeded in-memory stores, fault-injecting wrappers and
//! a log capture subscriber.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pieceport_engine::MigrationContext;
use pieceport_store::{
    AckStream, DestinationStore, RecordStream, SourceStore, SqliteStore, StoreError,
};
use pieceport_types::{DealInfo, IndexRecord, IndexWriteAck, PieceCid, PieceMetadata};
use tokio_util::sync::CancellationToken;

pub fn cid(s: &str) -> PieceCid {
    PieceCid::parse(s).unwrap()
}

pub fn records(n: u64) -> Vec<IndexRecord> {
    (0..n)
        .map(|i| IndexRecord::new(format!("bafkblock{i}"), i * 256, 256))
        .collect()
}

pub fn deal(uuid: &str) -> DealInfo {
    DealInfo {
        deal_uuid: uuid.to_string(),
        is_legacy: false,
        chain_deal_id: 42,
        miner_addr: "f01234".into(),
        sector_id: 7,
        piece_offset: 0,
        piece_length: 2048,
        car_length: 1900,
        is_direct_deal: false,
    }
}

/// Write `n` records for `piece` straight into `store`.
pub fn seed_index(store: &SqliteStore, piece: &PieceCid, n: u64, complete: bool) {
    let items: Vec<pieceport_store::Result<IndexRecord>> = records(n).into_iter().map(Ok).collect();
    let acks: Vec<IndexWriteAck> =
        DestinationStore::add_index(store, piece, Box::new(items.into_iter()), complete).collect();
    assert!(acks.iter().all(|a| !a.is_error()), "seeding failed: {acks:?}");
}

pub fn seed_deals(store: &SqliteStore, piece: &PieceCid, uuids: &[&str]) {
    for uuid in uuids {
        store.add_deal_for_piece(piece, &deal(uuid)).unwrap();
    }
}

/// Sorted index of `piece` as held by `store`.
pub fn index_of(store: &dyn DestinationStore, piece: &PieceCid) -> Vec<IndexRecord> {
    let mut out: Vec<IndexRecord> = store
        .get_index(piece)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    out.sort_by(|a, b| a.cid.cmp(&b.cid));
    out
}

pub fn ctx() -> MigrationContext {
    MigrationContext::new(CancellationToken::new())
}

/// Legacy store wrapper that counts reads and injects failures.
pub struct FaultySource {
    pub inner: Arc<SqliteStore>,
    /// Reads of anything but the piece list.
    pub reads: AtomicUsize,
    /// Pieces whose record stream fails after `fail_after` records.
    pub broken_index: HashSet<PieceCid>,
    pub fail_after: usize,
    pub broken_deals: HashSet<PieceCid>,
    pub fail_list: bool,
    /// Delay before each record is yielded.
    pub record_delay: Option<Duration>,
}

impl FaultySource {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            broken_index: HashSet::new(),
            fail_after: 1,
            broken_deals: HashSet::new(),
            fail_list: false,
            record_delay: None,
        }
    }

    pub fn break_index(mut self, piece: &PieceCid) -> Self {
        self.broken_index.insert(piece.clone());
        self
    }

    pub fn break_deals(mut self, piece: &PieceCid) -> Self {
        self.broken_deals.insert(piece.clone());
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.record_delay = Some(delay);
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }
}

impl SourceStore for FaultySource {
    fn list_pieces(&self) -> pieceport_store::Result<Vec<PieceCid>> {
        if self.fail_list {
            return Err(StoreError::Corrupt("piece table unreadable".into()));
        }
        self.inner.list_pieces()
    }

    fn is_complete_index(&self, piece: &PieceCid) -> pieceport_store::Result<bool> {
        self.touch();
        self.inner.is_complete_index(piece)
    }

    fn get_index(&self, piece: &PieceCid) -> pieceport_store::Result<RecordStream<'_>> {
        self.touch();
        let stream = SourceStore::get_index(self.inner.as_ref(), piece)?;
        let delay = self.record_delay;
        let stream: RecordStream<'_> = if self.broken_index.contains(piece) {
            let fail_after = self.fail_after;
            let piece = piece.clone();
            Box::new(stream.take(fail_after).chain(std::iter::once_with(move || {
                Err(StoreError::Corrupt(format!("truncated index for {piece}")))
            })))
        } else {
            stream
        };
        let stream: RecordStream<'_> = match delay {
            Some(delay) => Box::new(stream.inspect(move |_| std::thread::sleep(delay))),
            None => stream,
        };
        Ok(stream)
    }

    fn get_piece_metadata(&self, piece: &PieceCid) -> pieceport_store::Result<PieceMetadata> {
        self.touch();
        SourceStore::get_piece_metadata(self.inner.as_ref(), piece)
    }

    fn get_piece_deals(&self, piece: &PieceCid) -> pieceport_store::Result<Vec<DealInfo>> {
        self.touch();
        if self.broken_deals.contains(piece) {
            return Err(StoreError::Corrupt(format!("deal row for {piece} unreadable")));
        }
        SourceStore::get_piece_deals(self.inner.as_ref(), piece)
    }
}

/// Destination wrapper that injects failures and tracks in-flight writes.
pub struct FaultyDest {
    pub inner: Arc<SqliteStore>,
    pub rejected_index: HashSet<PieceCid>,
    pub broken_gate: HashSet<PieceCid>,
    /// Deal writes allowed before every further one fails.
    pub deal_write_budget: Option<usize>,
    deal_writes: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// Buffer every record, then hold the write this long before committing.
    pub commit_delay: Option<Duration>,
}

impl FaultyDest {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            rejected_index: HashSet::new(),
            broken_gate: HashSet::new(),
            deal_write_budget: None,
            deal_writes: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            commit_delay: None,
        }
    }

    pub fn slow_commit(mut self, delay: Duration) -> Self {
        self.commit_delay = Some(delay);
        self
    }

    pub fn reject_index(mut self, piece: &PieceCid) -> Self {
        self.rejected_index.insert(piece.clone());
        self
    }

    pub fn break_gate(mut self, piece: &PieceCid) -> Self {
        self.broken_gate.insert(piece.clone());
        self
    }

    pub fn deal_budget(mut self, writes: usize) -> Self {
        self.deal_write_budget = Some(writes);
        self
    }
}

impl DestinationStore for FaultyDest {
    fn is_indexed(&self, piece: &PieceCid) -> pieceport_store::Result<bool> {
        if self.broken_gate.contains(piece) {
            return Err(StoreError::Corrupt("meta row unreadable".into()));
        }
        self.inner.is_indexed(piece)
    }

    fn add_index<'a>(
        &'a self,
        piece: &PieceCid,
        records: RecordStream<'a>,
        is_complete: bool,
    ) -> AckStream<'a> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let acks: Vec<IndexWriteAck> = if self.rejected_index.contains(piece) {
            // Drain like a real backend would before failing.
            let read = records.count();
            vec![
                IndexWriteAck::ok(0),
                IndexWriteAck::failed(format!("disk full after {read} records")),
            ]
        } else if let Some(delay) = self.commit_delay {
            let buffered: Vec<pieceport_store::Result<IndexRecord>> = records.collect();
            std::thread::sleep(delay);
            self.inner
                .add_index(piece, Box::new(buffered.into_iter()), is_complete)
                .collect()
        } else {
            self.inner.add_index(piece, records, is_complete).collect()
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Box::new(acks.into_iter())
    }

    fn add_deal_for_piece(&self, piece: &PieceCid, deal: &DealInfo) -> pieceport_store::Result<()> {
        let written = self.deal_writes.fetch_add(1, Ordering::SeqCst);
        if self.deal_write_budget.is_some_and(|budget| written >= budget) {
            return Err(StoreError::Rejected(format!("deal {} refused", deal.deal_uuid)));
        }
        self.inner.add_deal_for_piece(piece, deal)
    }

    fn get_piece_deals(&self, piece: &PieceCid) -> pieceport_store::Result<Vec<DealInfo>> {
        DestinationStore::get_piece_deals(self.inner.as_ref(), piece)
    }

    fn get_index(&self, piece: &PieceCid) -> pieceport_store::Result<RecordStream<'_>> {
        DestinationStore::get_index(self.inner.as_ref(), piece)
    }

    fn get_piece_metadata(&self, piece: &PieceCid) -> pieceport_store::Result<PieceMetadata> {
        DestinationStore::get_piece_metadata(self.inner.as_ref(), piece)
    }
}

/// In-memory sink for formatted log lines.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn dispatch(&self) -> tracing::Dispatch {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();
        tracing::Dispatch::new(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
