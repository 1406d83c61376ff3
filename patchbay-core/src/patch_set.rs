//! Patch discovery and ordering.
//!
//! A patch directory is a flat directory of SQL scripts. Every regular,
//! non-hidden file in it is a patch and must be named `^\d{4,}...`; the
//! lexicographic order of the names is the application order.
//!
//! Validation happens in two passes: all names are checked before any file is
//! read, so a bad name is reported without side effects.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{io_err, PatchError};
use crate::hash::read_and_hash;
use crate::ledger::Ledger;
use crate::types::{Patch, PatchName};

/// The ordered set of patches found under one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSet {
    pub root: PathBuf,
    patches: Vec<Patch>,
}

impl PatchSet {
    /// Discover every patch under `root`, skipping any path in `exclude`
    /// (typically the ledger file when it lives next to the patches).
    pub fn discover(root: &Path, exclude: &[&Path]) -> Result<Self, PatchError> {
        if !root.is_dir() {
            return Err(PatchError::PatchDirNotFound {
                path: root.to_path_buf(),
            });
        }

        let excluded: Vec<PathBuf> = exclude
            .iter()
            .filter_map(|p| std::fs::canonicalize(p).ok())
            .collect();

        let mut entries: Vec<(String, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(root).map_err(|e| io_err(root, e))? {
            let entry = entry.map_err(|e| io_err(root, e))?;
            let file_type = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            if let Ok(canonical) = std::fs::canonicalize(&path) {
                if excluded.contains(&canonical) {
                    continue;
                }
            }
            entries.push((name, path));
        }

        // Pass 1: names only.
        validate_names(root, entries.iter().map(|(name, _)| name.as_str()))?;

        // Pass 2: hash in application order.
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let mut patches = Vec::with_capacity(entries.len());
        for (name, path) in entries {
            let (_, hash) = read_and_hash(&path)?;
            patches.push(Patch {
                name: PatchName::from(name),
                path,
                hash,
            });
        }

        tracing::debug!(root = %root.display(), count = patches.len(), "discovered patches");
        Ok(Self {
            root: root.to_path_buf(),
            patches,
        })
    }

    /// All patches in application order.
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn get(&self, name: &PatchName) -> Option<&Patch> {
        self.patches
            .binary_search_by(|p| p.name.cmp(name))
            .ok()
            .map(|idx| &self.patches[idx])
    }

    /// Patches not recorded in `ledger`, in application order.
    pub fn pending(&self, ledger: &Ledger) -> Vec<&Patch> {
        self.patches
            .iter()
            .filter(|p| !ledger.contains(&p.name))
            .collect()
    }

    /// The patch directory viewed as a ledger: one record per file, carrying
    /// its current on-disk hash. Used to diff the file ledger against disk.
    pub fn as_ledger(&self) -> Ledger {
        let mut ledger = Ledger::default();
        for patch in &self.patches {
            ledger.insert(crate::types::AppliedPatchRecord {
                name: patch.name.clone(),
                hash: patch.hash.clone(),
                applied_at: None,
            });
        }
        ledger
    }
}

/// `list(root)`: every patch under `root` in application order.
pub fn list(root: &Path) -> Result<Vec<Patch>, PatchError> {
    Ok(PatchSet::discover(root, &[])?.patches)
}

/// `pending(root, ledger)`: the subsequence of `list(root)` not in `ledger`.
pub fn pending(root: &Path, ledger: &Ledger) -> Result<Vec<Patch>, PatchError> {
    let set = PatchSet::discover(root, &[])?;
    Ok(set.pending(ledger).into_iter().cloned().collect())
}

fn validate_names<'a>(
    root: &Path,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), PatchError> {
    let mut seen: HashMap<String, &'a str> = HashMap::new();
    let mut names: Vec<&str> = names.collect();
    names.sort_unstable();
    for name in names {
        if !PatchName::is_well_formed(name) {
            return Err(PatchError::InvalidPatchName {
                name: name.to_string(),
                dir: root.to_path_buf(),
            });
        }
        if let Some(existing) = seen.insert(name.to_ascii_lowercase(), name) {
            return Err(PatchError::DuplicatePatchName {
                name: name.to_string(),
                existing: existing.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn validate_rejects_case_collision() {
        let err = validate_names(
            Path::new("/p"),
            ["0010_Foo.sql", "0010_foo.sql"].into_iter(),
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::DuplicatePatchName { .. }), "got: {err}");
    }

    #[test]
    fn validate_reports_first_bad_name_in_sorted_order() {
        let err = validate_names(Path::new("/p"), ["zzz.sql", "abc.sql"].into_iter()).unwrap_err();
        match err {
            PatchError::InvalidPatchName { name, .. } => assert_eq!(name, "abc.sql"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn get_finds_patch_by_name() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("0010_a.sql"), "a").unwrap();
        std::fs::write(tmp.path().join("0020_b.sql"), "b").unwrap();
        let set = PatchSet::discover(tmp.path(), &[]).unwrap();
        assert!(set.get(&PatchName::from("0020_b.sql")).is_some());
        assert!(set.get(&PatchName::from("0030_c.sql")).is_none());
    }
}
