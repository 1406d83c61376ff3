//! SHA-256 content hashing for patch files and ledger entries.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{io_err, PatchError};

/// Lowercase hex SHA-256 digest of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Read `path` and return its bytes together with their digest.
pub fn read_and_hash(path: &Path) -> Result<(Vec<u8>, String), PatchError> {
    let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
    let digest = content_hash(&bytes);
    Ok((bytes, digest))
}
