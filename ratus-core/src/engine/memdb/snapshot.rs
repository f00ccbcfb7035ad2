//! Snapshot encoding for the in-memory engine.
//!
//! A snapshot is a sequence of CBOR-encoded task records concatenated in a
//! single file. The encoding is self-describing and round-trips arbitrary
//! payload shapes. Writes go to a temporary sibling file which is atomically
//! renamed over the snapshot path.

use std::io::Cursor;
use std::path::Path;

use ratus_model::Task;

use crate::error::{Error, Result};
use crate::nonce;

/// Write a snapshot of all tasks to the given path.
pub(crate) fn save(tasks: Vec<Task>, path: &Path) -> Result<()> {
    let mut buf = Vec::new();
    for t in &tasks {
        ciborium::ser::into_writer(t, &mut buf)
            .map_err(|e| Error::Internal(format!("failed to encode snapshot record: {e}")))?;
    }

    // Write to a temporary file next to the snapshot path, then rename it
    // into place so readers never observe a partial snapshot.
    let tmp = temp_path(path);
    if let Err(e) = std::fs::write(&tmp, &buf) {
        return Err(Error::Internal(format!("failed to write snapshot: {e}")));
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(Error::Internal(format!("failed to rename snapshot: {e}")));
    }

    Ok(())
}

/// Read all tasks from a snapshot file. Returns `None` if the file does not
/// exist.
pub(crate) fn load(path: &Path) -> Result<Option<Vec<Task>>> {
    let data = match std::fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Internal(format!("failed to read snapshot: {e}"))),
    };

    let len = data.len() as u64;
    let mut cursor = Cursor::new(data);
    let mut tasks = Vec::new();
    while cursor.position() < len {
        let t: Task = ciborium::de::from_reader(&mut cursor)
            .map_err(|e| Error::Internal(format!("failed to decode snapshot record: {e}")))?;
        tasks.push(t);
    }

    Ok(Some(tasks))
}

fn temp_path(path: &Path) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".");
    s.push(nonce::generate(8));
    std::path::PathBuf::from(s)
}
