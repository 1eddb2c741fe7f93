//! Pending mutation batch
//!
//! Mutations accumulate here between flushes. At flush time the whole
//! batch is taken and replaced with a fresh empty one in a single swap, so
//! new mutations keep accumulating while the old batch is being written.
//! If the process dies before that write completes the batch is simply
//! lost; the persisted offset never advanced past the previous flush, so
//! replaying the log reconstructs it.

use crate::kv::BatchOp;

/// Ordered key/value mutations awaiting a durable write.
#[derive(Debug, Default)]
pub struct PendingBatch {
    ops: Vec<BatchOp>,
}

impl PendingBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::put(key, value));
    }

    /// Queue a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::delete(key));
    }

    /// Queue an arbitrary op.
    pub fn push(&mut self, op: BatchOp) {
        self.ops.push(op);
    }

    /// Number of queued mutations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Take every queued op, leaving the batch empty.
    pub fn take(&mut self) -> Vec<BatchOp> {
        std::mem::take(&mut self.ops)
    }
}
