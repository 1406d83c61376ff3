//! Workflow results. Every report is `Serialize` for `--json` output.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use patchbay_core::{AppliedPatchRecord, PatchName};
use patchbay_instance::OrphanReport;

use crate::baseline::WriteResult;
use crate::snapshot::Comparison;

/// Which two records disagree about a patch hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchSource {
    /// Ledger file vs. the patch file on disk.
    PatchFile,
    /// Ledger file vs. the ledger table in the target.
    LedgerTable,
}

/// A non-fatal condition surfaced by a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Same patch, different hash.
    LedgerMismatch {
        name: PatchName,
        ledger_hash: String,
        other_hash: String,
        source: MismatchSource,
    },
    /// Ledger file entry without a patch file.
    MissingPatchFile { name: PatchName },
    /// Ledger table entry unknown to the ledger file: the target is ahead.
    UnknownAppliedPatch { name: PatchName },
    /// A pre-ledger database got its ledger table filled from the ledger file.
    LedgerBackfilled { count: usize },
    /// Resulting schema differs from the accepted baseline.
    SchemaDriftDetected { unified_diff: String },
    /// No accepted baseline to compare against.
    NoBaselineToCompare { path: PathBuf },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::LedgerMismatch {
                name,
                ledger_hash,
                other_hash,
                source,
            } => {
                let other = match source {
                    MismatchSource::PatchFile => "patch file",
                    MismatchSource::LedgerTable => "ledger table",
                };
                write!(
                    f,
                    "ledger mismatch for {name}: ledger file has {}, {other} has {}",
                    short(ledger_hash),
                    short(other_hash)
                )
            }
            Warning::MissingPatchFile { name } => {
                write!(f, "{name} is in the ledger file but its patch file is gone")
            }
            Warning::UnknownAppliedPatch { name } => {
                write!(f, "{name} is applied in the target but absent from the ledger file")
            }
            Warning::LedgerBackfilled { count } => {
                write!(f, "created ledger table and backfilled {count} record(s) from the ledger file")
            }
            Warning::SchemaDriftDetected { .. } => {
                write!(f, "resulting schema differs from the accepted baseline")
            }
            Warning::NoBaselineToCompare { path } => {
                write!(f, "no baseline at {} to compare against", path.display())
            }
        }
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Pass/fail of one patch in a Test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchOutcome {
    pub name: PatchName,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributeReport {
    pub applied: Vec<AppliedPatchRecord>,
    pub writes: Vec<WriteResult>,
    /// Ledger records appended (or, in fake mode, that would have been).
    pub ledger_appended: usize,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestReport {
    pub outcomes: Vec<PatchOutcome>,
    /// Directory of an instance left running for inspection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kept_instance: Option<PathBuf>,
    pub warnings: Vec<Warning>,
}

impl TestReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    pub fn success(&self) -> bool {
        self.passed() == self.attempted()
    }

    /// TAP-style lines: `ok 1 - name`, `not ok 2 - name`, then a summary.
    pub fn tap(&self) -> String {
        let mut out = format!("1..{}\n", self.attempted());
        for (i, outcome) in self.outcomes.iter().enumerate() {
            let status = if outcome.passed { "ok" } else { "not ok" };
            out.push_str(&format!("{status} {} - {}\n", i + 1, outcome.name));
            if let Some(detail) = &outcome.detail {
                for line in detail.lines() {
                    out.push_str(&format!("# {line}\n"));
                }
            }
        }
        out.push_str(&format!("# passed {}/{}\n", self.passed(), self.attempted()));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FakeInstallReport {
    /// Whether the live target had any schema to copy.
    pub live_had_schema: bool,
    pub pending: Vec<PatchName>,
    pub applied: Vec<AppliedPatchRecord>,
    /// The patch that stopped the rehearsal, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<PatchOutcome>,
    /// Absent when nothing was compared (failure or no baseline).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
    pub warnings: Vec<Warning>,
}

impl FakeInstallReport {
    /// Drift is advisory: only a failed patch makes the rehearsal fail.
    pub fn success(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    /// The target was empty and got initialised from the baseline.
    pub initialized_from_baseline: bool,
    pub applied: Vec<AppliedPatchRecord>,
    pub warnings: Vec<Warning>,
}

/// Where a patch stands across patch directory, ledger file and (optionally)
/// the target's ledger table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchState {
    /// On disk, not yet in the ledger file.
    Pending,
    /// In the ledger file (and, when checked, not yet in the target).
    Distributed,
    /// In the ledger file and the target's ledger table with the same hash.
    Installed,
    /// Hashes disagree somewhere.
    Drift,
    /// In the ledger file but the patch file is gone.
    MissingFile,
    /// Only in the target's ledger table.
    Unknown,
}

impl PatchState {
    pub fn label(self) -> &'static str {
        match self {
            PatchState::Pending => "pending",
            PatchState::Distributed => "distributed",
            PatchState::Installed => "installed",
            PatchState::Drift => "drift",
            PatchState::MissingFile => "missing file",
            PatchState::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchStatus {
    pub name: PatchName,
    pub state: PatchState,
    pub on_disk: bool,
    pub in_ledger_file: bool,
    /// `None` when the target was not consulted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_ledger_table: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub patches: Vec<PatchStatus>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub reaped: Vec<PathBuf>,
    pub stopped: Vec<i32>,
    pub failed: Vec<(PathBuf, String)>,
}

impl From<OrphanReport> for CleanupReport {
    fn from(report: OrphanReport) -> Self {
        Self {
            reaped: report.reaped,
            stopped: report.stopped,
            failed: report
                .failed
                .into_iter()
                .map(|f| (f.path, f.reason))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(name: &str, passed: bool, detail: Option<&str>) -> PatchOutcome {
        PatchOutcome {
            name: name.into(),
            passed,
            detail: detail.map(str::to_string),
        }
    }

    #[test]
    fn tap_lists_each_patch_and_summary() {
        let report = TestReport {
            outcomes: vec![
                outcome("0010_create_foo.sql", true, None),
                outcome("0020_add_bar.sql", false, Some("ERROR:  relation \"foo\" does not exist")),
            ],
            kept_instance: None,
            warnings: vec![],
        };
        assert_eq!(
            report.tap(),
            "1..2\n\
             ok 1 - 0010_create_foo.sql\n\
             not ok 2 - 0020_add_bar.sql\n\
             # ERROR:  relation \"foo\" does not exist\n\
             # passed 1/2\n"
        );
        assert!(!report.success());
    }

    #[test]
    fn empty_test_run_is_a_full_pass() {
        let report = TestReport {
            outcomes: vec![],
            kept_instance: None,
            warnings: vec![],
        };
        assert!(report.success());
        assert_eq!(report.tap(), "1..0\n# passed 0/0\n");
    }

    #[test]
    fn warnings_serialize_with_kind_tag() {
        let w = Warning::UnknownAppliedPatch {
            name: "0030_hotfix.sql".into(),
        };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["kind"], "unknown_applied_patch");
        assert_eq!(json["name"], "0030_hotfix.sql");
    }

    #[test]
    fn mismatch_message_shows_short_hashes() {
        let w = Warning::LedgerMismatch {
            name: "0010_create_foo.sql".into(),
            ledger_hash: "a".repeat(64),
            other_hash: "b".repeat(64),
            source: MismatchSource::LedgerTable,
        };
        assert_eq!(
            w.to_string(),
            "ledger mismatch for 0010_create_foo.sql: ledger file has aaaaaaaaaaaa, ledger table has bbbbbbbbbbbb"
        );
    }
}
