//! Per-index persisted metadata
//!
//! One record per index, stored under a reserved sentinel key in the
//! index's namespace. The `offset` field is the last log offset whose
//! derived mutations are durably written; on restart the framework resumes
//! strictly after it. A stored `version` that differs from the declared
//! schema version invalidates the whole index.

use serde::{Deserialize, Serialize};

/// Reserved key for the metadata record. A single zero byte sorts before
/// every real index key.
pub const META_KEY: &[u8] = &[0x00];

/// Persisted progress of one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Declared schema version of the projection.
    pub version: u32,
    /// Last durably committed log offset, `-1` before the first flush.
    pub offset: i64,
    /// Records the projection has processed.
    pub processed: u64,
}

impl IndexMetadata {
    /// Fresh metadata for an index that has processed nothing.
    pub fn new(version: u32) -> Self {
        Self {
            version,
            offset: -1,
            processed: 0,
        }
    }

    /// Serialize for the metadata record.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Struct-to-JSON cannot fail for these field types.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse a stored metadata record. `None` for unreadable bytes, which
    /// callers treat exactly like a version mismatch: wipe and rebuild.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}
