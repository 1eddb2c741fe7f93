//! Sorted offset sets
//!
//! An ordered sequence of log offsets with O(log n) membership, used by the
//! private-content index to remember which records are encrypted and which
//! this identity can open. Streaming scans append in arrival order (which
//! is offset order); one-off reclassification inserts at the correct sorted
//! position. The set is strictly ascending with no duplicates for any mix
//! of the two.

mod snapshot;

pub use snapshot::{load_snapshot, save_snapshot, Snapshot, SnapshotError, SnapshotResult};

/// Strictly ascending set of log offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortedOffsetSet {
    offsets: Vec<u64>,
}

impl SortedOffsetSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a set from decoded snapshot contents.
    ///
    /// Returns `None` when the sequence is not strictly ascending.
    pub fn from_ascending(offsets: Vec<u64>) -> Option<Self> {
        if offsets.windows(2).any(|w| w[0] >= w[1]) {
            return None;
        }
        Some(Self { offsets })
    }

    /// Number of offsets in the set.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// O(log n) membership test.
    pub fn contains(&self, offset: u64) -> bool {
        self.offsets.binary_search(&offset).is_ok()
    }

    /// Append an offset arriving in stream order.
    ///
    /// Falls back to an ordered insert when the offset is not past the
    /// current tail, so the ascending invariant holds for any input.
    pub fn push(&mut self, offset: u64) {
        match self.offsets.last() {
            Some(&last) if offset <= last => self.insert(offset),
            _ => self.offsets.push(offset),
        }
    }

    /// Insert an offset at its sorted position. Duplicates are a no-op.
    pub fn insert(&mut self, offset: u64) {
        if let Err(pos) = self.offsets.binary_search(&offset) {
            self.offsets.insert(pos, offset);
        }
    }

    /// Largest offset in the set.
    pub fn last(&self) -> Option<u64> {
        self.offsets.last().copied()
    }

    /// Iterate offsets in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.offsets.iter().copied()
    }

    /// View the offsets as a slice.
    pub fn as_slice(&self) -> &[u64] {
        &self.offsets
    }

    /// Offsets present in `self` but not in `other`, ascending.
    ///
    /// Both sets are sorted, so a single merge walk suffices.
    pub fn difference(&self, other: &SortedOffsetSet) -> Vec<u64> {
        let mut out = Vec::new();
        let mut theirs = other.offsets.iter().peekable();

        for &offset in &self.offsets {
            while theirs.next_if(|&&o| o < offset).is_some() {}
            if theirs.peek() != Some(&&offset) {
                out.push(offset);
            }
        }
        out
    }

    /// Remove every offset.
    pub fn clear(&mut self) {
        self.offsets.clear();
    }
}
