//! Durable key-value store seam
//!
//! Each logical index owns one namespaced store holding its derived
//! key/value pairs plus a reserved metadata record. The store itself is an
//! external collaborator (a sorted persistent KV engine in production); the
//! framework only needs get, an atomic durable batch write, and an
//! all-at-once clear. `MemoryKv` is the in-process adapter used by tests
//! and by hosts that keep derived state in memory.

use std::collections::BTreeMap;

use thiserror::Error;

/// Result type for key-value operations.
pub type KvResult<T> = Result<T, KvError>;

/// Key-value store failures.
#[derive(Debug, Error)]
pub enum KvError {
    /// A durable write did not complete. Fatal to the owning index.
    #[error("key-value write failed: {0}")]
    WriteFailed(String),

    /// A read failed for a reason other than the key being absent.
    #[error("key-value read failed: {0}")]
    ReadFailed(String),

    /// The store was closed and can accept no further operations.
    #[error("key-value store is closed")]
    Closed,
}

/// One pending mutation in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite a key.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Remove a key.
    Delete { key: Vec<u8> },
}

impl BatchOp {
    /// Convenience constructor for a put.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Convenience constructor for a delete.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self::Delete { key: key.into() }
    }
}

/// Namespaced durable store for one index.
pub trait KvStore {
    /// Fetch a single value. `Ok(None)` when the key is absent.
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    /// Apply a batch of mutations atomically and durably.
    ///
    /// Either every op in the batch is visible after a crash or none is.
    fn write_batch(&mut self, ops: Vec<BatchOp>) -> KvResult<()>;

    /// Drop every key in the namespace.
    fn clear(&mut self) -> KvResult<()>;

    /// Release the store. Further operations fail with `Closed`.
    fn close(&mut self) -> KvResult<()>;

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;
}

/// In-memory `KvStore` adapter.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    closed: bool,
}

impl MemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in key order, for state comparison in tests and tools.
    pub fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        if self.closed {
            return Err(KvError::Closed);
        }
        Ok(self.entries.get(key).cloned())
    }

    fn write_batch(&mut self, ops: Vec<BatchOp>) -> KvResult<()> {
        if self.closed {
            return Err(KvError::Closed);
        }
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    self.entries.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    self.entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn clear(&mut self) -> KvResult<()> {
        if self.closed {
            return Err(KvError::Closed);
        }
        self.entries.clear();
        Ok(())
    }

    fn close(&mut self) -> KvResult<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
