//! Incremental indexing framework
//!
//! Derives secondary views over the append-only log, one record at a time,
//! and persists progress so a restart resumes where the last durable write
//! left off instead of rescanning the whole log. The concrete view logic
//! is a pluggable [`Projection`]; the framework owns batching, flushing,
//! metadata, and the catch-up/live lifecycle.

mod batch;
mod errors;
mod metadata;
mod runner;

pub use batch::PendingBatch;
pub use errors::{IndexError, IndexResult};
pub use metadata::{IndexMetadata, META_KEY};
pub use runner::{IndexOptions, IndexRunner, IndexState, Projection};
