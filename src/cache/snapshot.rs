//! Persisted snapshots and atomic writes.
//!
//! Every snapshot is pretty JSON wrapped in a `{ "version": N, "data": … }`
//! envelope. Bump [`SNAPSHOT_VERSION`] to invalidate all existing caches when
//! the format or key computation changes: a version mismatch loads as
//! [`SnapshotError::Corrupt`], which callers recover from as empty state.
//!
//! Files are written to a hidden sibling and renamed into place, so a reader
//! never sees a half-written file and a crash leaves the previous snapshot
//! intact.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("corrupt snapshot {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("IO error writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    data: &'a T,
}

#[derive(serde::Deserialize)]
struct Envelope<T> {
    version: u32,
    data: T,
}

/// Load a snapshot.
///
/// `Ok(None)` when the file does not exist. Any other read failure, a parse
/// failure or a version mismatch is [`SnapshotError::Corrupt`].
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, SnapshotError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(corrupt(path, err.to_string())),
    };
    let envelope: Envelope<T> =
        serde_json::from_str(&content).map_err(|err| corrupt(path, err.to_string()))?;
    if envelope.version != SNAPSHOT_VERSION {
        return Err(corrupt(
            path,
            format!(
                "version {} (expected {})",
                envelope.version, SNAPSHOT_VERSION
            ),
        ));
    }
    Ok(Some(envelope.data))
}

/// Serialize `data` and atomically replace `path` with it.
pub fn save<T: Serialize>(path: &Path, data: &T) -> Result<(), SnapshotError> {
    let json = serde_json::to_string_pretty(&EnvelopeRef {
        version: SNAPSHOT_VERSION,
        data,
    })?;
    write_atomic(path, json.as_bytes()).map_err(|source| SnapshotError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn corrupt(path: &Path, reason: String) -> SnapshotError {
    SnapshotError::Corrupt {
        path: path.to_path_buf(),
        reason,
    }
}

/// Hidden sibling used while writing `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Write to a temporary sibling, then rename over `path`.
///
/// Parent directories are created as needed. On failure the temporary file is
/// removed and `path` is left untouched.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    if let Err(err) = std::fs::write(&tmp, bytes).and_then(|()| std::fs::rename(&tmp, path)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}
