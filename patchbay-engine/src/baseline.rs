//! Baseline artifacts on disk: the accepted schema snapshot and optional
//! seed data.
//!
//! ## `publish` protocol
//!
//! 1. Normalise line endings.
//! 2. Compare with the current file content → `Unchanged` if identical.
//! 3. In fake mode stop here with `WouldWrite`.
//! 4. Write `<path>.patchbay.tmp`, fsync.
//! 5. Rename over the final path (atomic on POSIX).

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use patchbay_core::hash::content_hash;
use patchbay_core::ledger::tmp_path;

use crate::error::{io_err, EngineError};
use crate::snapshot::Snapshot;

/// Outcome of publishing one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "path", rename_all = "snake_case")]
pub enum WriteResult {
    /// Content changed or the file did not exist.
    Written(PathBuf),
    /// Content identical; file untouched.
    Unchanged(PathBuf),
    /// Fake mode: the file would have been written.
    WouldWrite(PathBuf),
}

impl WriteResult {
    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written(p) | WriteResult::Unchanged(p) | WriteResult::WouldWrite(p) => p,
        }
    }
}

/// Read an accepted snapshot. A missing file is `None`.
pub fn load(path: &Path) -> Result<Option<Snapshot>, EngineError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(Snapshot::from_normalized(text))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}

/// Replace `path` with `snapshot` atomically, skipping identical content.
pub fn publish(path: &Path, snapshot: &Snapshot, dry_run: bool) -> Result<WriteResult, EngineError> {
    let content = snapshot.as_str();

    let unchanged = match fs::read(path) {
        Ok(existing) => content_hash(&existing) == content_hash(content.as_bytes()),
        Err(err) if err.kind() == ErrorKind::NotFound => false,
        Err(err) => return Err(io_err(path, err)),
    };
    if unchanged {
        tracing::debug!(path = %path.display(), "baseline unchanged");
        return Ok(WriteResult::Unchanged(path.to_path_buf()));
    }

    if dry_run {
        tracing::info!(path = %path.display(), "[fake] would write baseline");
        return Ok(WriteResult::WouldWrite(path.to_path_buf()));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = tmp_path(path);
    let written = File::create(&tmp)
        .and_then(|mut f| {
            f.write_all(content.as_bytes())?;
            f.sync_all()
        })
        .map_err(|e| io_err(&tmp, e));
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(path, err));
    }

    tracing::info!(path = %path.display(), "wrote baseline");
    Ok(WriteResult::Written(path.to_path_buf()))
}
