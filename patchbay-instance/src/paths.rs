//! On-disk layout of an ephemeral instance directory.
//!
//! ```text
//! <base_dir>/<prefix><pid>-<nanos>/     (mode 0700)
//!   data/          server data directory
//!   socket/        private Unix socket directory
//!   server.log     server stdout + stderr
//!   instance.pid   server pid, written after spawn
//! ```
//!
//! Orphan cleanup relies on this convention: anything under `base_dir` whose
//! name starts with the prefix and contains `instance.pid` or `data/` is
//! treated as an instance.

use std::path::{Path, PathBuf};

pub const DATA_DIR: &str = "data";
pub const SOCKET_DIR: &str = "socket";
pub const SERVER_LOG: &str = "server.log";
pub const PID_FILE: &str = "instance.pid";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceLayout {
    pub root: PathBuf,
}

impl InstanceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.root.join(SOCKET_DIR)
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(SERVER_LOG)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.root.join(PID_FILE)
    }

    /// `true` when `dir` looks like an instance directory made under `prefix`.
    pub fn matches_convention(dir: &Path, prefix: &str) -> bool {
        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        name.starts_with(prefix)
            && dir.is_dir()
            && (dir.join(PID_FILE).exists() || dir.join(DATA_DIR).is_dir())
    }
}
