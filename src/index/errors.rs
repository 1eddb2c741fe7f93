//! Indexing framework error types
//!
//! Absence (`NotFound`) and undecodable entries (`Decode`) are per-lookup
//! conditions the caller can handle. A failed durable write is fatal to the
//! index owner: the framework never advances its in-memory offset past a
//! write that did not complete, so the only safe reaction is to surface it.

use thiserror::Error;

use crate::kv::KvError;
use crate::log::LogError;

/// Result type for framework operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Indexing framework failures.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A lookup key has no entry.
    #[error("index {name}: no entry for key {key}")]
    NotFound { name: String, key: String },

    /// An entry exists but cannot be decoded for this view.
    #[error("index {name}: failed to decode entry {key}: {reason}")]
    Decode {
        name: String,
        key: String,
        reason: String,
    },

    /// A durable batch write did not complete. Fatal.
    #[error("index {name}: durable write failed: {source}")]
    DurableWrite {
        name: String,
        #[source]
        source: KvError,
    },

    /// Persisted state could not be read.
    #[error("index {name}: storage read failed: {source}")]
    StorageRead {
        name: String,
        #[source]
        source: KvError,
    },

    /// Clearing the namespace during a rebuild failed.
    #[error("index {name}: reset failed: {source}")]
    ResetFailed {
        name: String,
        #[source]
        source: KvError,
    },

    /// The log stream failed mid-scan.
    #[error("index {name}: log read failed: {source}")]
    LogRead {
        name: String,
        #[source]
        source: LogError,
    },

    /// The index was closed and accepts no further records.
    #[error("index {name} is closed")]
    Closed { name: String },
}

impl IndexError {
    /// Whether this failure requires the index owner to stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IndexError::DurableWrite { .. } | IndexError::ResetFailed { .. }
        )
    }
}
