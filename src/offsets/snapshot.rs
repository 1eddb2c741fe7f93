//! Offset-set snapshot files
//!
//! Layout: `[high-water offset: i32 LE][body crc32: u32 LE][body]` where the
//! body is the ascending offsets as deltas in LEB128 varints. Offsets from a
//! live log are often near-contiguous, so the deltas compress to a byte or
//! two each.
//!
//! A missing or empty file is not an error here; it signals a cold start to
//! the caller, which must reset the affected high-water offset. A malformed
//! file is `Corrupt`, which the caller also degrades to a cold start.

use std::io;
use std::path::Path;

use thiserror::Error;

use super::SortedOffsetSet;
use crate::io::atomic;

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Snapshot persistence failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// I/O failure reading or replacing the snapshot file.
    #[error("snapshot I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The file exists but its contents cannot be decoded.
    #[error("corrupt snapshot {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

impl SnapshotError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }
}

/// Decoded snapshot contents.
#[derive(Debug, PartialEq, Eq)]
pub struct Snapshot {
    /// High-water offset the set was authoritative up to when saved.
    pub high_water: i64,
    /// The persisted offsets.
    pub set: SortedOffsetSet,
}

const HEADER_LEN: usize = 8;

/// Serialize the set and replace the snapshot file atomically.
pub fn save_snapshot(path: &Path, high_water: i64, set: &SortedOffsetSet) -> SnapshotResult<()> {
    let high_water = i32::try_from(high_water)
        .map_err(|_| SnapshotError::corrupt(path, "high-water offset exceeds i32 range"))?;

    let body = compress(set);
    let crc = crc32fast::hash(&body);

    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(&high_water.to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&body);

    atomic::write(path, &buf).map_err(|e| SnapshotError::io(path, e))
}

/// Load a snapshot. `Ok(None)` means the file is missing or empty (cold
/// start); a file that cannot be decoded is `Corrupt`.
pub fn load_snapshot(path: &Path) -> SnapshotResult<Option<Snapshot>> {
    let bytes = match atomic::read(path).map_err(|e| SnapshotError::io(path, e))? {
        Some(bytes) if !bytes.is_empty() => bytes,
        _ => return Ok(None),
    };

    if bytes.len() < HEADER_LEN {
        return Err(SnapshotError::corrupt(path, "truncated header"));
    }

    let high_water = i32::from_le_bytes(bytes[0..4].try_into().unwrap()) as i64;
    let stored_crc = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let body = &bytes[HEADER_LEN..];

    if crc32fast::hash(body) != stored_crc {
        return Err(SnapshotError::corrupt(path, "body checksum mismatch"));
    }

    let offsets =
        decompress(body).map_err(|reason| SnapshotError::corrupt(path, reason))?;
    let set = SortedOffsetSet::from_ascending(offsets)
        .ok_or_else(|| SnapshotError::corrupt(path, "offsets not strictly ascending"))?;

    Ok(Some(Snapshot { high_water, set }))
}

/// Delta-encode ascending offsets as LEB128 varints.
fn compress(set: &SortedOffsetSet) -> Vec<u8> {
    let mut body = Vec::with_capacity(set.len() * 2);
    let mut prev = 0u64;
    for (i, offset) in set.iter().enumerate() {
        let delta = if i == 0 { offset } else { offset - prev };
        write_varint(&mut body, delta);
        prev = offset;
    }
    body
}

fn decompress(body: &[u8]) -> Result<Vec<u64>, String> {
    let mut offsets = Vec::new();
    let mut pos = 0;
    let mut prev = 0u64;

    while pos < body.len() {
        let (delta, read) = read_varint(&body[pos..]).ok_or("truncated varint")?;
        pos += read;

        let offset = if offsets.is_empty() {
            delta
        } else {
            if delta == 0 {
                return Err("zero delta (duplicate offset)".into());
            }
            prev.checked_add(delta).ok_or("offset overflow")?
        };
        offsets.push(offset);
        prev = offset;
    }

    Ok(offsets)
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn read_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in bytes.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}
