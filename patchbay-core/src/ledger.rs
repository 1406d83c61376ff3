//! Applied-patch ledgers: the flat ledger file shipped with the patches, and
//! the pure diff used to reconcile it with any other ledger source.
//!
//! # File format
//!
//! ```text
//! # comments and blank lines are ignored
//! 0010_create_foo.sql	<sha256-hex>	2026-01-01T00:00:00Z
//! 0020_add_bar.sql	<sha256-hex>
//! ```
//!
//! Fields are whitespace separated; `name` and `hash` are required, a third
//! field is read as an RFC 3339 timestamp when it parses, anything after is
//! ignored. A missing file is an empty ledger.
//!
//! Appends rewrite the whole file through a `.patchbay.tmp` sibling and a
//! rename, so a crash leaves either the old file or the old file plus every
//! new line.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{io_err, PatchError};
use crate::types::{AppliedPatchRecord, PatchName};

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Applied-patch records keyed (and therefore ordered) by patch name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    records: BTreeMap<PatchName, AppliedPatchRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, returning the one it replaced.
    pub fn insert(&mut self, record: AppliedPatchRecord) -> Option<AppliedPatchRecord> {
        self.records.insert(record.name.clone(), record)
    }

    pub fn get(&self, name: &PatchName) -> Option<&AppliedPatchRecord> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &PatchName) -> bool {
        self.records.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in application order.
    pub fn records(&self) -> impl Iterator<Item = &AppliedPatchRecord> {
        self.records.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &PatchName> {
        self.records.keys()
    }
}

impl FromIterator<AppliedPatchRecord> for Ledger {
    fn from_iter<I: IntoIterator<Item = AppliedPatchRecord>>(iter: I) -> Self {
        let mut ledger = Ledger::new();
        for record in iter {
            ledger.insert(record);
        }
        ledger
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// A patch recorded in both ledgers with different hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashMismatch {
    pub name: PatchName,
    pub left_hash: String,
    pub right_hash: String,
}

/// Result of [`diff`]: every name falls in at most one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerDiff {
    pub only_in_left: Vec<AppliedPatchRecord>,
    pub only_in_right: Vec<AppliedPatchRecord>,
    pub mismatched: Vec<HashMismatch>,
}

impl LedgerDiff {
    /// `true` when both ledgers record exactly the same patches and hashes.
    pub fn is_empty(&self) -> bool {
        self.only_in_left.is_empty() && self.only_in_right.is_empty() && self.mismatched.is_empty()
    }
}

/// Compare two ledgers by patch name. Pure: no I/O, outputs in name order.
pub fn diff(left: &Ledger, right: &Ledger) -> LedgerDiff {
    let mut out = LedgerDiff::default();
    let mut l = left.records.values().peekable();
    let mut r = right.records.values().peekable();

    loop {
        match (l.peek(), r.peek()) {
            (Some(a), Some(b)) => match a.name.cmp(&b.name) {
                std::cmp::Ordering::Less => {
                    out.only_in_left.push((*a).clone());
                    l.next();
                }
                std::cmp::Ordering::Greater => {
                    out.only_in_right.push((*b).clone());
                    r.next();
                }
                std::cmp::Ordering::Equal => {
                    if a.hash != b.hash {
                        out.mismatched.push(HashMismatch {
                            name: a.name.clone(),
                            left_hash: a.hash.clone(),
                            right_hash: b.hash.clone(),
                        });
                    }
                    l.next();
                    r.next();
                }
            },
            (Some(a), None) => {
                out.only_in_left.push((*a).clone());
                l.next();
            }
            (None, Some(b)) => {
                out.only_in_right.push((*b).clone());
                r.next();
            }
            (None, None) => break,
        }
    }
    out
}

// ---------------------------------------------------------------------------
// File ledger
// ---------------------------------------------------------------------------

/// Parse ledger file content. `path` is only used for error messages.
pub fn parse(path: &Path, content: &str) -> Result<Ledger, PatchError> {
    let mut ledger = Ledger::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(name), Some(hash)) = (fields.next(), fields.next()) else {
            return Err(PatchError::MalformedLedger {
                path: path.to_path_buf(),
                line: idx + 1,
                content: raw.to_string(),
            });
        };
        let applied_at = fields
            .next()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));

        let record = AppliedPatchRecord {
            name: PatchName::from(name),
            hash: hash.to_string(),
            applied_at,
        };
        if ledger.contains(&record.name) {
            tracing::warn!(
                ledger = %path.display(),
                line = idx + 1,
                patch = %record.name,
                "duplicate ledger entry ignored; keeping the first record",
            );
            continue;
        }
        ledger.insert(record);
    }
    Ok(ledger)
}

/// Render one record as a ledger line (without the trailing newline).
pub fn render_line(record: &AppliedPatchRecord) -> String {
    match record.applied_at {
        Some(ts) => format!(
            "{}\t{}\t{}",
            record.name,
            record.hash,
            ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        ),
        None => format!("{}\t{}", record.name, record.hash),
    }
}

/// Read the ledger file at `path`. A missing file is an empty ledger.
pub fn read_file(path: &Path) -> Result<Ledger, PatchError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse(path, &content),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Ledger::new()),
        Err(err) => Err(io_err(path, err)),
    }
}

/// Append `record` to the ledger file at `path`.
///
/// Returns `false` (and leaves the file untouched) when the name is already
/// recorded.
pub fn append_file(path: &Path, record: &AppliedPatchRecord) -> Result<bool, PatchError> {
    append_records(path, std::slice::from_ref(record)).map(|appended| appended == 1)
}

/// Append every record not yet in the ledger file at `path` with a single
/// rewrite: either all new lines land or none do. Returns how many were
/// appended.
pub fn append_records(
    path: &Path,
    records: &[AppliedPatchRecord],
) -> Result<usize, PatchError> {
    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
        Err(err) => return Err(io_err(path, err)),
    };
    let mut recorded = parse(path, &existing)?;

    let mut content = existing;
    let mut appended = 0;
    for record in records {
        if let Some(current) = recorded.get(&record.name) {
            tracing::warn!(
                ledger = %path.display(),
                patch = %record.name,
                recorded_hash = %current.hash,
                "patch already recorded in ledger file; not appending",
            );
            continue;
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&render_line(record));
        content.push('\n');
        recorded.insert(record.clone());
        appended += 1;
    }
    if appended == 0 {
        return Ok(0);
    }

    replace_atomically(path, content.as_bytes())?;
    tracing::debug!(ledger = %path.display(), appended, "appended ledger records");
    Ok(appended)
}

/// Sibling temp path used for atomic replacement of `path`.
pub fn tmp_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.patchbay.tmp", path.display()))
}

fn replace_atomically(path: &Path, bytes: &[u8]) -> Result<(), PatchError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = tmp_path(path);
    let write = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()
    };
    if let Err(e) = write() {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&tmp, e));
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
