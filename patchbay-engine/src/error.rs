//! Error types for patchbay-engine.

use std::path::PathBuf;

use thiserror::Error;

use patchbay_core::{ConfigError, PatchError, PatchName};
use patchbay_instance::InstanceError;

/// All errors that can abort a workflow.
///
/// Drift and ledger mismatches are not here: they are
/// [`crate::report::Warning`]s collected in the workflow report.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Patch discovery or file ledger failure.
    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Ephemeral instance start/stop failure.
    #[error("instance error: {0}")]
    Instance(#[from] InstanceError),

    /// The target rejected a script. Patches applied before it stay applied.
    #[error("failed to apply {patch}: {detail}")]
    ApplyFailure { patch: String, detail: String },

    /// Rebuilding history from scratch while a ledger already exists.
    #[error("ledger file {ledger} records applied patches but baseline {baseline} is missing; refusing to rebuild history from an empty schema")]
    MissingBaseline { ledger: PathBuf, baseline: PathBuf },

    /// A ledger entry that must be applied has no patch file.
    #[error("patch {name} is recorded in the ledger file but missing from the patch directory")]
    PatchFileMissing { name: PatchName },

    #[error("`{command}` failed (status {status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("unexpected output from `{command}`: {output:?}")]
    UnexpectedOutput { command: String, output: String },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`EngineError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.into(),
        source,
    }
}
