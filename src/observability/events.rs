//! Typed lifecycle events
//!
//! Every observable state change in the indexing layer is a named event.
//! Names are stable identifiers; log filters key on them.

use std::fmt;

use super::Severity;

/// Observable events in the indexing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Index lifecycle
    /// Persisted metadata read at startup
    IndexMetadataLoaded,
    /// Stored version mismatched, derived state cleared
    IndexReset,
    /// Catch-up scan over historical records started
    IndexScanStart,
    /// Catch-up scan drained, index transitioning to live
    IndexScanComplete,
    /// Batched mutations and metadata durably written
    IndexFlush,
    /// Index closed
    IndexClosed,

    // Private content index
    /// Offset-set snapshots loaded (or cold start)
    PrivateStateLoaded,
    /// Offset-set snapshots written
    PrivateStateSaved,
    /// Snapshot write failed (state stays in memory, retried later)
    PrivateSaveFailed,
    /// Decrypt state cleared for full reclassification
    PrivateReset,
    /// A ciphertext lacked a field required by its envelope form
    PrivateMissingField,
}

impl Event {
    /// Stable identifier for this event.
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::IndexMetadataLoaded => "INDEX_METADATA_LOADED",
            Event::IndexReset => "INDEX_RESET",
            Event::IndexScanStart => "INDEX_SCAN_START",
            Event::IndexScanComplete => "INDEX_SCAN_COMPLETE",
            Event::IndexFlush => "INDEX_FLUSH",
            Event::IndexClosed => "INDEX_CLOSED",
            Event::PrivateStateLoaded => "PRIVATE_STATE_LOADED",
            Event::PrivateStateSaved => "PRIVATE_STATE_SAVED",
            Event::PrivateSaveFailed => "PRIVATE_SAVE_FAILED",
            Event::PrivateReset => "PRIVATE_RESET",
            Event::PrivateMissingField => "PRIVATE_MISSING_FIELD",
        }
    }

    /// Default severity this event is logged at.
    pub fn severity(&self) -> Severity {
        match self {
            Event::PrivateSaveFailed => Severity::Error,
            Event::PrivateMissingField => Severity::Warn,
            Event::IndexFlush => Severity::Trace,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
