use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error surface for ephemeral instance lifecycle and process control.
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed (status {status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("instance at {root} not ready after {waited:?}; last log lines:\n{log_tail}")]
    InstanceStartTimeout {
        root: PathBuf,
        waited: Duration,
        log_tail: String,
    },

    #[error("instance at {root} exited before becoming ready ({status}); last log lines:\n{log_tail}")]
    ServerExited {
        root: PathBuf,
        status: String,
        log_tail: String,
    },

    #[error("process {pid} still running after SIGKILL ({polls} polls)")]
    InstanceStopTimeout { pid: i32, polls: u32 },

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("refusing to signal pid {pid}")]
    UnsafePid { pid: i32 },

    #[error("instance at {root} is {actual}, expected {expected}")]
    InvalidState {
        root: PathBuf,
        expected: &'static str,
        actual: &'static str,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> InstanceError {
    InstanceError::Io {
        path: path.into(),
        source,
    }
}
