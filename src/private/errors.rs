//! Private index error types
//!
//! Failing to decrypt is not an error here; the absence of plaintext is the
//! normal signal for "not decryptable" and the caller sees the original
//! record. Only real I/O faults while loading persisted state surface, with
//! the file that failed named in the message. Corrupt snapshots degrade to
//! a cold start and save failures are logged, so neither appears here.

use thiserror::Error;

use crate::offsets::SnapshotError;

/// Result type for private index operations.
pub type PrivateResult<T> = Result<T, PrivateError>;

/// Private index failures.
#[derive(Debug, Error)]
pub enum PrivateError {
    /// A snapshot file exists but could not be read.
    #[error("private index failed to load {file}: {source}")]
    Load {
        file: String,
        #[source]
        source: SnapshotError,
    },
}

impl PrivateError {
    pub(crate) fn load(file: &str, source: SnapshotError) -> Self {
        Self::Load {
            file: file.to_string(),
            source,
        }
    }
}
