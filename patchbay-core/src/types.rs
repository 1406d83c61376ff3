//! Domain types for patches and applied-patch records.
//!
//! All path fields use `PathBuf`; patch identity is the bare file name.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A patch file name, e.g. `0010_create_foo.sql`.
///
/// Ordering is plain lexicographic byte order of the name, which is the
/// application order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchName(pub String);

impl PatchName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` when the name starts with at least four ASCII digits.
    pub fn is_well_formed(name: &str) -> bool {
        name.bytes().take_while(u8::is_ascii_digit).count() >= 4
    }
}

impl fmt::Display for PatchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PatchName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PatchName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// A discovered patch file. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Patch {
    pub name: PatchName,
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the file bytes at discovery time.
    pub hash: String,
}

/// One applied patch, as recorded in the ledger file or the ledger table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPatchRecord {
    pub name: PatchName,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
}

impl AppliedPatchRecord {
    /// Record for `patch` stamped with the current time.
    pub fn applied_now(patch: &Patch) -> Self {
        Self {
            name: patch.name.clone(),
            hash: patch.hash.clone(),
            applied_at: Some(Utc::now()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
