//! Applying one patch to one database.

use chrono::Utc;

use patchbay_core::hash::read_and_hash;
use patchbay_core::{AppliedPatchRecord, Patch};

use crate::backend::{Endpoint, PatchApplier};
use crate::error::EngineError;

/// Send `patch` verbatim to `target` and return the record to put in a
/// ledger.
///
/// The file is re-read and re-hashed first; if it changed since discovery
/// nothing is sent. Any client error becomes [`EngineError::ApplyFailure`].
/// The caller decides ordering and whether the patch is due at all.
pub fn apply_patch<A>(
    applier: &A,
    target: &Endpoint,
    patch: &Patch,
) -> Result<AppliedPatchRecord, EngineError>
where
    A: PatchApplier + ?Sized,
{
    let (bytes, hash) = read_and_hash(&patch.path)?;
    if hash != patch.hash {
        return Err(EngineError::ApplyFailure {
            patch: patch.name.to_string(),
            detail: format!(
                "file changed since discovery (expected {}, found {hash})",
                patch.hash
            ),
        });
    }

    tracing::info!(patch = %patch.name, endpoint = %target, "applying patch");
    applier
        .run_script(target, patch.name.as_str(), &bytes)
        .map_err(|err| EngineError::ApplyFailure {
            patch: patch.name.to_string(),
            detail: err.to_string(),
        })?;

    Ok(AppliedPatchRecord {
        name: patch.name.clone(),
        hash,
        applied_at: Some(Utc::now()),
    })
}
