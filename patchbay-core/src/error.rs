//! Error types for patchbay-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while discovering patches or reading/writing the file ledger.
///
/// Every variant here is a validation or storage failure: they are reported
/// before any database process is started.
#[derive(Debug, Error)]
pub enum PatchError {
    /// A file in the patch directory does not start with at least four digits.
    #[error("invalid patch name '{name}' in {dir}: patch files must start with at least 4 digits")]
    InvalidPatchName { name: String, dir: PathBuf },

    /// Two discovered patch names collide (equal after ASCII case folding).
    #[error("duplicate patch name '{name}' (collides with '{existing}')")]
    DuplicatePatchName { name: String, existing: String },

    /// The patch directory itself is missing.
    #[error("patch directory not found at {path}")]
    PatchDirNotFound { path: PathBuf },

    /// A ledger line could not be split into `name` and `hash`.
    #[error("malformed ledger entry at {path}:{line}: {content:?}")]
    MalformedLedger {
        path: PathBuf,
        line: usize,
        content: String,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while loading or validating [`crate::config::EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load; serde_yaml supplies the line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("missing required configuration: {field}")]
    Missing { field: &'static str },

    #[error("invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Convenience constructor for [`PatchError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> PatchError {
    PatchError::Io {
        path: path.into(),
        source,
    }
}
