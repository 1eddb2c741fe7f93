//! Crash-atomic whole-file read and replace
//!
//! Snapshot files (offset sets) are always rewritten in full. A replace
//! goes through a temporary sibling file that is fsynced before being
//! renamed over the target, then the parent directory is fsynced, so a
//! crash at any point leaves either the old contents or the new contents,
//! never a torn file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

/// Read the entire file, distinguishing "does not exist" from failure.
///
/// Returns `Ok(None)` when the file is absent; every other I/O failure is
/// surfaced to the caller.
pub fn read(path: &Path) -> io::Result<Option<Vec<u8>>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(Some(buf))
}

/// Replace the file contents atomically.
///
/// After a successful return the bytes are durable. After a crash mid-call
/// the target holds either its previous contents or `bytes`, in full.
pub fn write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    if !parent.exists() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);

    let mut tmp = File::create(&tmp_path)?;
    tmp.write_all(bytes)?;
    // fsync is mandatory before the rename makes the contents visible
    tmp.sync_all()?;
    drop(tmp);

    fs::rename(&tmp_path, path)?;

    // fsync parent directory so the rename itself is durable
    let dir = OpenOptions::new().read(true).open(parent)?;
    dir.sync_all()?;

    Ok(())
}
