//! Append-only log seam
//!
//! The log is the system of record: an ordered sequence of immutable,
//! offset-addressed records owned by an external storage engine. Indexes
//! only ever read it, in two modes: a finite catch-up scan from a given
//! offset, and a live subscription that keeps delivering records as they
//! are appended. `MemoryLog` is the in-process adapter used by tests and
//! lightweight hosts.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Log read failures.
#[derive(Debug, Error)]
pub enum LogError {
    /// No record exists at the requested offset.
    #[error("no log record at offset {0}")]
    NotFound(u64),

    /// The underlying storage could not be read.
    #[error("log read failed: {0}")]
    ReadFailed(String),
}

/// One record of the log.
///
/// `value` is `None` for a deleted record, which still occupies its offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Strictly increasing identifier assigned by the log.
    pub offset: u64,
    /// Encoded record bytes, or `None` when erased.
    pub value: Option<Vec<u8>>,
}

/// Read access to an append-only log.
///
/// `after` is a signed offset so that `-1` means "from the beginning".
pub trait Log {
    /// Finite ordered read of every record with offset greater than `after`.
    fn read_after(
        &self,
        after: i64,
    ) -> LogResult<Box<dyn Iterator<Item = LogResult<LogRecord>> + '_>>;

    /// Live subscription to every record with offset greater than `after`,
    /// continuing with records appended afterwards.
    ///
    /// The backlog hand-off must be atomic with subscriber registration:
    /// no record is delivered twice and none is skipped, even when appends
    /// race the subscription.
    fn live_after(&self, after: i64) -> LogResult<Receiver<LogRecord>>;

    /// Random-access fetch of a single record.
    fn get(&self, offset: u64) -> LogResult<LogRecord>;
}

#[derive(Debug, Default)]
struct MemoryLogInner {
    records: Vec<LogRecord>,
    next_offset: u64,
    subscribers: Vec<Sender<LogRecord>>,
    live_shutdown: bool,
}

/// In-memory `Log` adapter.
///
/// Clones share the same underlying log.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    inner: Arc<Mutex<MemoryLogInner>>,
}

impl MemoryLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, returning its assigned offset.
    pub fn append(&self, value: Vec<u8>) -> u64 {
        self.append_record(Some(value))
    }

    /// Append an erased record (occupies an offset, carries no value).
    pub fn append_erased(&self) -> u64 {
        self.append_record(None)
    }

    fn append_record(&self, value: Option<Vec<u8>>) -> u64 {
        let mut inner = self.inner.lock().expect("memory log lock poisoned");
        let offset = inner.next_offset;
        inner.next_offset += 1;

        let record = LogRecord { offset, value };
        inner.records.push(record.clone());
        inner
            .subscribers
            .retain(|sender| sender.send(record.clone()).is_ok());
        offset
    }

    /// Disconnect every live subscriber. Their receivers observe end of
    /// stream, which is how a host winds down live indexing. Terminal:
    /// later subscriptions receive the backlog and end immediately.
    pub fn shutdown_live(&self) {
        let mut inner = self.inner.lock().expect("memory log lock poisoned");
        inner.live_shutdown = true;
        inner.subscribers.clear();
    }

    /// Number of records appended so far.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("memory log lock poisoned").records.len()
    }

    /// Whether the log holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Log for MemoryLog {
    fn read_after(
        &self,
        after: i64,
    ) -> LogResult<Box<dyn Iterator<Item = LogResult<LogRecord>> + '_>> {
        let inner = self.inner.lock().expect("memory log lock poisoned");
        let backlog: Vec<LogRecord> = inner
            .records
            .iter()
            .filter(|r| (r.offset as i64) > after)
            .cloned()
            .collect();
        Ok(Box::new(backlog.into_iter().map(Ok)))
    }

    fn live_after(&self, after: i64) -> LogResult<Receiver<LogRecord>> {
        // Backlog drain and subscriber registration happen under one lock,
        // so records appended while subscribing are neither dropped nor
        // delivered twice.
        let mut inner = self.inner.lock().expect("memory log lock poisoned");
        let (sender, receiver) = mpsc::channel();

        for record in inner.records.iter().filter(|r| (r.offset as i64) > after) {
            // Receiver is still in scope, the send cannot fail.
            let _ = sender.send(record.clone());
        }
        if !inner.live_shutdown {
            inner.subscribers.push(sender);
        }
        Ok(receiver)
    }

    fn get(&self, offset: u64) -> LogResult<LogRecord> {
        let inner = self.inner.lock().expect("memory log lock poisoned");
        inner
            .records
            .iter()
            .find(|r| r.offset == offset)
            .cloned()
            .ok_or(LogError::NotFound(offset))
    }
}
