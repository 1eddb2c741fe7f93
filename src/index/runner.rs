//! Index lifecycle driver
//!
//! One `IndexRunner` owns one logical index: its namespaced store, its
//! projection, and its progress metadata. The lifecycle is
//! `Uninitialized → Loading → (Resetting | Resuming) → CatchingUp → Live`,
//! with `Closed` as the terminal state.
//!
//! Durability rule: metadata travels in the same atomic batch as the
//! mutations it covers, so the persisted offset can never claim a record
//! whose mutations did not reach storage. A crash between flushes loses
//! only in-memory state that the next catch-up scan re-derives.

use crate::clock::{Clock, Debounce, SystemClock};
use crate::kv::KvStore;
use crate::log::{Log, LogRecord};
use crate::observability::{log_event, Event};

use super::batch::PendingBatch;
use super::errors::{IndexError, IndexResult};
use super::metadata::{IndexMetadata, META_KEY};

/// Lifecycle state of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Constructed, metadata not read yet.
    Uninitialized,
    /// Reading persisted metadata.
    Loading,
    /// Version mismatch: clearing all derived state.
    Resetting,
    /// Metadata valid: restored offset and processed count.
    Resuming,
    /// Scanning historical records.
    CatchingUp,
    /// Following the log tail.
    Live,
    /// Closed, accepts nothing further.
    Closed,
}

/// Tuning knobs for one index.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Flush the pending batch once it holds this many mutations during
    /// catch-up. Bounds memory and crash-replay cost.
    pub chunk_size: usize,
    /// Live mode coalesces flushes into at most one per this window.
    pub live_flush_window_millis: u64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            live_flush_window_millis: 250,
        }
    }
}

/// Per-index derivation logic.
///
/// The framework feeds every log record to the projection exactly once, in
/// offset order, across the lifetime of the index (records since the last
/// durable flush are re-presented after a crash). The projection pushes
/// whatever mutations the record implies into the batch.
pub trait Projection {
    /// Derive mutations for one record. `processed` is the count of
    /// records seen before this one.
    fn process_record(
        &mut self,
        record: &LogRecord,
        processed: u64,
        batch: &mut PendingBatch,
    ) -> IndexResult<()>;
}

/// Drives one index through load, catch-up, and live tailing.
pub struct IndexRunner<P, S> {
    name: String,
    version: u32,
    store: S,
    projection: P,
    clock: Box<dyn Clock>,
    options: IndexOptions,
    state: IndexState,
    batch: PendingBatch,
    /// Last durably committed offset.
    offset: i64,
    /// Offset the in-memory projection has advanced to.
    pending_offset: i64,
    processed: u64,
    live_gate: Debounce,
}

impl<P: Projection, S: KvStore> IndexRunner<P, S> {
    /// Create a runner with default options and the system clock.
    pub fn new(name: impl Into<String>, version: u32, store: S, projection: P) -> Self {
        Self::with_options(name, version, store, projection, IndexOptions::default())
    }

    /// Create a runner with explicit options.
    pub fn with_options(
        name: impl Into<String>,
        version: u32,
        store: S,
        projection: P,
        options: IndexOptions,
    ) -> Self {
        let live_gate = Debounce::new(options.live_flush_window_millis);
        Self {
            name: name.into(),
            version,
            store,
            projection,
            clock: Box::new(SystemClock),
            options,
            state: IndexState::Uninitialized,
            batch: PendingBatch::new(),
            offset: -1,
            pending_offset: -1,
            processed: 0,
            live_gate,
        }
    }

    /// Replace the clock, for deterministic tests.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> IndexState {
        self.state
    }

    /// Last durably committed log offset.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Records the projection has processed.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// The underlying store, for reads by the index owner.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Tear down the runner and hand the store back to the owner.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Read persisted metadata and either resume or wipe and rebuild.
    pub fn load(&mut self) -> IndexResult<()> {
        self.ensure_open()?;
        self.state = IndexState::Loading;

        let stored = self
            .store
            .get(META_KEY)
            .map_err(|e| IndexError::StorageRead {
                name: self.name.clone(),
                source: e,
            })?
            .and_then(|bytes| IndexMetadata::from_bytes(&bytes));

        match stored {
            Some(meta) if meta.version == self.version => {
                self.state = IndexState::Resuming;
                self.offset = meta.offset;
                self.pending_offset = meta.offset;
                self.processed = meta.processed;
                log_event(
                    Event::IndexMetadataLoaded,
                    &[
                        ("name", &self.name),
                        ("offset", &meta.offset.to_string()),
                        ("processed", &meta.processed.to_string()),
                    ],
                );
            }
            stored => {
                // Absent, unreadable, or written by a different schema
                // version: all derived state is stale.
                self.state = IndexState::Resetting;
                self.store.clear().map_err(|e| IndexError::ResetFailed {
                    name: self.name.clone(),
                    source: e,
                })?;
                self.offset = -1;
                self.pending_offset = -1;
                self.processed = 0;
                let reason = if stored.is_some() {
                    "version_mismatch"
                } else {
                    "missing_metadata"
                };
                log_event(Event::IndexReset, &[("name", &self.name), ("reason", reason)]);
            }
        }

        self.state = IndexState::CatchingUp;
        Ok(())
    }

    /// Drain every historical record with offset greater than the durable
    /// offset, then transition to `Live`.
    pub fn catch_up<L: Log>(&mut self, log: &L) -> IndexResult<()> {
        if self.state == IndexState::Uninitialized {
            self.load()?;
        }
        self.ensure_open()?;

        log_event(
            Event::IndexScanStart,
            &[("name", &self.name), ("from", &self.offset.to_string())],
        );

        let records = log.read_after(self.offset).map_err(|e| IndexError::LogRead {
            name: self.name.clone(),
            source: e,
        })?;
        for record in records {
            let record = record.map_err(|e| IndexError::LogRead {
                name: self.name.clone(),
                source: e,
            })?;
            self.apply(&record)?;
            if self.batch.len() >= self.options.chunk_size {
                self.flush()?;
            }
        }
        self.flush()?;

        log_event(
            Event::IndexScanComplete,
            &[
                ("name", &self.name),
                ("offset", &self.offset.to_string()),
                ("processed", &self.processed.to_string()),
            ],
        );
        self.state = IndexState::Live;
        Ok(())
    }

    /// Follow the log tail until the subscription ends.
    ///
    /// Each record flushes through the debounce gate: bursts coalesce into
    /// at most one durable write per window. Whatever the gate absorbed is
    /// flushed when the subscription ends.
    pub fn live<L: Log>(&mut self, log: &L) -> IndexResult<()> {
        self.ensure_open()?;

        let records = log.live_after(self.offset).map_err(|e| IndexError::LogRead {
            name: self.name.clone(),
            source: e,
        })?;
        for record in records {
            self.apply(&record)?;
            let now = self.clock.now_millis();
            if self.live_gate.request(now) {
                self.flush()?;
            }
        }

        if self.live_gate.take_pending() || !self.batch.is_empty() {
            self.flush()?;
        }
        Ok(())
    }

    /// Full lifecycle: load, catch up, then tail until the log ends.
    pub fn run<L: Log>(&mut self, log: &L) -> IndexResult<()> {
        self.load()?;
        self.catch_up(log)?;
        self.live(log)
    }

    /// Feed one record to the projection.
    fn apply(&mut self, record: &LogRecord) -> IndexResult<()> {
        self.ensure_open()?;
        self.projection
            .process_record(record, self.processed, &mut self.batch)?;
        self.processed += 1;
        self.pending_offset = record.offset as i64;
        Ok(())
    }

    /// Durably write the pending batch plus metadata covering it.
    ///
    /// No-ops after close so an in-flight flush cannot fail a teardown.
    /// On write failure the durable offset stays where it was and the
    /// error propagates to the index owner.
    pub fn flush(&mut self) -> IndexResult<()> {
        if self.state == IndexState::Closed || self.store.is_closed() {
            return Ok(());
        }
        if self.batch.is_empty() && self.pending_offset == self.offset {
            return Ok(());
        }

        let mut ops = self.batch.take();
        let meta = IndexMetadata {
            version: self.version,
            offset: self.pending_offset,
            processed: self.processed,
        };
        ops.push(crate::kv::BatchOp::put(META_KEY.to_vec(), meta.to_bytes()));

        self.store
            .write_batch(ops)
            .map_err(|e| IndexError::DurableWrite {
                name: self.name.clone(),
                source: e,
            })?;

        self.offset = self.pending_offset;
        log_event(
            Event::IndexFlush,
            &[("name", &self.name), ("offset", &self.offset.to_string())],
        );
        Ok(())
    }

    /// Fetch one derived entry. Absence is a typed `NotFound`.
    pub fn lookup(&self, key: &[u8]) -> IndexResult<Vec<u8>> {
        self.store
            .get(key)
            .map_err(|e| IndexError::StorageRead {
                name: self.name.clone(),
                source: e,
            })?
            .ok_or_else(|| IndexError::NotFound {
                name: self.name.clone(),
                key: String::from_utf8_lossy(key).into_owned(),
            })
    }

    /// Flush outstanding work and release the store. Idempotent.
    pub fn close(&mut self) -> IndexResult<()> {
        if self.state == IndexState::Closed {
            return Ok(());
        }
        self.flush()?;
        self.state = IndexState::Closed;
        self.store.close().map_err(|e| IndexError::DurableWrite {
            name: self.name.clone(),
            source: e,
        })?;
        log_event(Event::IndexClosed, &[("name", &self.name)]);
        Ok(())
    }

    fn ensure_open(&self) -> IndexResult<()> {
        if self.state == IndexState::Closed {
            return Err(IndexError::Closed {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryKv;
    use crate::log::MemoryLog;

    /// Keys each record's offset by its raw value bytes.
    struct ByValue;

    impl Projection for ByValue {
        fn process_record(
            &mut self,
            record: &LogRecord,
            _processed: u64,
            batch: &mut PendingBatch,
        ) -> IndexResult<()> {
            if let Some(value) = &record.value {
                batch.put(value.clone(), record.offset.to_string().into_bytes());
            }
            Ok(())
        }
    }

    fn runner(store: MemoryKv) -> IndexRunner<ByValue, MemoryKv> {
        IndexRunner::new("by_value", 1, store, ByValue)
    }

    #[test]
    fn catch_up_projects_every_record() {
        let log = MemoryLog::new();
        log.append(b"alice".to_vec());
        log.append(b"bob".to_vec());
        log.append_erased();

        let mut runner = runner(MemoryKv::new());
        runner.catch_up(&log).unwrap();

        assert_eq!(runner.state(), IndexState::Live);
        assert_eq!(runner.processed(), 3);
        assert_eq!(runner.offset(), 2);
        assert_eq!(runner.lookup(b"alice").unwrap(), b"0".to_vec());
        assert_eq!(runner.lookup(b"bob").unwrap(), b"1".to_vec());
    }

    #[test]
    fn lookup_miss_is_typed_not_found() {
        let log = MemoryLog::new();
        let mut runner = runner(MemoryKv::new());
        runner.catch_up(&log).unwrap();

        assert!(matches!(
            runner.lookup(b"ghost"),
            Err(IndexError::NotFound { .. })
        ));
    }

    #[test]
    fn metadata_advances_only_at_flush() {
        let log = MemoryLog::new();
        for i in 0..5u8 {
            log.append(vec![i]);
        }

        let mut runner = IndexRunner::with_options(
            "by_value",
            1,
            MemoryKv::new(),
            ByValue,
            IndexOptions {
                chunk_size: 2,
                ..IndexOptions::default()
            },
        );
        runner.catch_up(&log).unwrap();

        let meta = IndexMetadata::from_bytes(&runner.store().get(META_KEY).unwrap().unwrap())
            .unwrap();
        assert_eq!(meta.offset, 4);
        assert_eq!(meta.processed, 5);
        assert_eq!(meta.version, 1);
    }

    #[test]
    fn version_mismatch_wipes_derived_state() {
        let log = MemoryLog::new();
        log.append(b"a".to_vec());

        let mut first = runner(MemoryKv::new());
        first.catch_up(&log).unwrap();
        let store = {
            // Simulate restart: rebuild a store with the persisted bytes.
            let mut copy = MemoryKv::new();
            let meta = first.store().get(META_KEY).unwrap().unwrap();
            let entry = first.store().get(b"a").unwrap().unwrap();
            copy.write_batch(vec![
                crate::kv::BatchOp::put(META_KEY.to_vec(), meta),
                crate::kv::BatchOp::put(b"a".to_vec(), entry),
            ])
            .unwrap();
            copy
        };

        let mut second = IndexRunner::new("by_value", 2, store, ByValue);
        second.load().unwrap();

        assert_eq!(second.offset(), -1);
        assert_eq!(second.processed(), 0);
        assert!(second.store().is_empty());
    }

    #[test]
    fn live_records_flush_through_the_debounce_gate() {
        let log = MemoryLog::new();
        let first = log.append(b"one".to_vec());

        let clock = Box::new(ManualClock::new(0));
        let mut runner = runner(MemoryKv::new()).with_clock(clock);
        runner.catch_up(&log).unwrap();
        assert_eq!(runner.offset(), first as i64);

        log.append(b"two".to_vec());
        log.append(b"three".to_vec());
        log.shutdown_live();
        runner.live(&log).unwrap();

        // The first live record fired immediately, the second was absorbed
        // and flushed when the subscription ended.
        assert_eq!(runner.offset(), 2);
        assert_eq!(runner.lookup(b"three").unwrap(), b"2".to_vec());
    }

    #[test]
    fn close_is_idempotent_and_rejects_records() {
        let log = MemoryLog::new();
        log.append(b"a".to_vec());

        let mut runner = runner(MemoryKv::new());
        runner.catch_up(&log).unwrap();
        runner.close().unwrap();
        runner.close().unwrap();

        assert_eq!(runner.state(), IndexState::Closed);
        assert!(matches!(
            runner.catch_up(&log),
            Err(IndexError::Closed { .. })
        ));
        // A flush after close is a no-op, not a failure.
        runner.flush().unwrap();
    }
}
