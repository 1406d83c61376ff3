//! The four workflows (distribute, test, fake-install, install) plus the
//! read-only status view and orphan cleanup.
//!
//! Every workflow validates configuration and discovers patches before any
//! external process starts; a bad patch name never reaches a database.

use std::collections::BTreeSet;
use std::path::PathBuf;

use patchbay_core::ledger::{self, Ledger};
use patchbay_core::{AppliedPatchRecord, EngineConfig, Patch, PatchName, PatchSet};

use crate::applier::apply_patch;
use crate::backend::{self, AnyBackend, Backend, DumpScope, Endpoint};
use crate::baseline;
use crate::error::EngineError;
use crate::report::{
    CleanupReport, DistributeReport, FakeInstallReport, InstallReport, MismatchSource,
    PatchOutcome, PatchState, PatchStatus, StatusReport, TestReport, Warning,
};
use crate::snapshot::{self, Snapshot};

const BASELINE_SCHEMA_LABEL: &str = "baseline schema";
const BASELINE_DATA_LABEL: &str = "baseline data";
const LIVE_COPY_LABEL: &str = "live schema copy";

pub struct ReconciliationEngine<B> {
    config: EngineConfig,
    backend: B,
}

impl ReconciliationEngine<AnyBackend> {
    /// Engine with the backend selected by `config` (dry-run when `fake`).
    pub fn from_config(config: EngineConfig) -> Self {
        let backend = backend::for_config(&config);
        Self::new(config, backend)
    }
}

impl<B: Backend> ReconciliationEngine<B> {
    pub fn new(config: EngineConfig, backend: B) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    // -----------------------------------------------------------------------
    // Distribute
    // -----------------------------------------------------------------------

    /// Rebuild the baseline: baseline + pending patches on a fresh instance,
    /// dump, then publish the snapshot and append the ledger file.
    ///
    /// Nothing is written unless every pending patch applied.
    pub fn distribute(&self) -> Result<DistributeReport, EngineError> {
        self.config.validate()?;
        let (set, file_ledger, warnings) = self.prepare()?;
        let (schema, data) = self.load_baseline(&file_ledger)?;
        let pending = set.pending(&file_ledger);
        tracing::info!(pending = pending.len(), "distribute: rebuilding baseline");

        let ((applied, new_schema, new_data), _) = self.with_instance(false, |target| {
            self.apply_baseline(target, schema.as_ref(), data.as_ref())?;
            let mut applied = Vec::with_capacity(pending.len());
            for patch in &pending {
                applied.push(apply_patch(&self.backend, target, patch)?);
            }
            let new_schema = snapshot::normalize(&self.backend.dump(target, DumpScope::Schema)?);
            let new_data = match self.config.baseline.data {
                Some(_) => Some(snapshot::normalize(
                    &self.backend.dump(target, DumpScope::Data)?,
                )),
                None => None,
            };
            Ok((applied, new_schema, new_data))
        })?;

        let fake = self.config.fake;
        let mut writes = vec![baseline::publish(
            &self.config.baseline.schema,
            &new_schema,
            fake,
        )?];
        if let (Some(path), Some(data)) = (&self.config.baseline.data, &new_data) {
            writes.push(baseline::publish(path, data, fake)?);
        }

        // One rewrite for the whole run: the ledger never records a prefix
        // of what the new baseline contains.
        let ledger_appended = if fake {
            for record in &applied {
                tracing::info!(patch = %record.name, "[fake] would append to ledger file");
            }
            applied.len()
        } else {
            ledger::append_records(&self.config.ledger_file, &applied)?
        };

        tracing::info!(applied = applied.len(), "distribute finished");
        Ok(DistributeReport {
            applied,
            writes,
            ledger_appended,
            warnings,
        })
    }

    // -----------------------------------------------------------------------
    // Test
    // -----------------------------------------------------------------------

    /// Apply every pending patch on top of the baseline, continuing past
    /// failures so each patch gets a verdict.
    pub fn test(&self) -> Result<TestReport, EngineError> {
        self.config.validate()?;
        let (set, file_ledger, warnings) = self.prepare()?;
        let (schema, data) = self.load_baseline(&file_ledger)?;
        let pending = set.pending(&file_ledger);
        let keep = self.config.instance.keep_running || self.config.instance.skip_cleanup;
        tracing::info!(pending = pending.len(), "test: applying pending patches");

        let (outcomes, kept_instance) = self.with_instance(keep, |target| {
            self.apply_baseline(target, schema.as_ref(), data.as_ref())?;
            let mut outcomes = Vec::with_capacity(pending.len());
            for patch in &pending {
                let outcome = match apply_patch(&self.backend, target, patch) {
                    Ok(_) => PatchOutcome {
                        name: patch.name.clone(),
                        passed: true,
                        detail: None,
                    },
                    Err(EngineError::ApplyFailure { detail, .. }) => {
                        tracing::warn!(patch = %patch.name, %detail, "patch failed; continuing");
                        PatchOutcome {
                            name: patch.name.clone(),
                            passed: false,
                            detail: Some(detail),
                        }
                    }
                    Err(err) => return Err(err),
                };
                outcomes.push(outcome);
            }
            Ok(outcomes)
        })?;

        let report = TestReport {
            outcomes,
            kept_instance,
            warnings,
        };
        tracing::info!(
            passed = report.passed(),
            attempted = report.attempted(),
            "test finished"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Fake-install
    // -----------------------------------------------------------------------

    /// Rehearse an install on a disposable copy of the live target and
    /// compare the result with the accepted baseline. Drift is a warning.
    pub fn fake_install(&self) -> Result<FakeInstallReport, EngineError> {
        self.config.validate_target()?;
        let (set, file_ledger, mut warnings) = self.prepare()?;
        let live = Endpoint::from_target(&self.config.target)?;

        let live_had_schema = self.backend.has_schema(&live)?;
        let (live_schema, live_ledger) = if live_had_schema {
            let schema = snapshot::normalize(&self.backend.dump(&live, DumpScope::Schema)?);
            let ledger = if self.backend.ledger_table_exists(&live)? {
                Some(self.backend.read_ledger_table(&live)?)
            } else {
                None
            };
            (Some(schema), ledger)
        } else {
            (None, None)
        };
        let (baseline_schema, baseline_data) = if live_had_schema {
            (baseline::load(&self.config.baseline.schema)?, None)
        } else {
            self.load_baseline(&file_ledger)?
        };
        tracing::info!(endpoint = %live, live_had_schema, "fake-install: copying live target");

        let (mut report, _) = self.with_instance(false, |copy| {
            let mut warnings = Vec::new();
            match &live_schema {
                Some(schema) => {
                    self.backend.ensure_namespace(copy)?;
                    self.run_labelled(copy, LIVE_COPY_LABEL, schema)?;
                    self.backend.create_ledger_table(copy)?;
                    match &live_ledger {
                        Some(table) => self.insert_all(copy, table)?,
                        None => self.backfill(copy, &file_ledger, &mut warnings)?,
                    }
                }
                None => {
                    self.apply_baseline(copy, baseline_schema.as_ref(), baseline_data.as_ref())?;
                    self.backend.create_ledger_table(copy)?;
                    self.insert_all(copy, &file_ledger)?;
                }
            }

            let table = self.backend.read_ledger_table(copy)?;
            let pending = reconcile(&file_ledger, &table, &mut warnings);
            let patches = resolve(&set, &pending)?;

            let mut applied = Vec::with_capacity(patches.len());
            let mut failure = None;
            for patch in &patches {
                match apply_patch(&self.backend, copy, patch) {
                    Ok(record) => {
                        self.backend.insert_ledger_record(copy, &record)?;
                        applied.push(record);
                    }
                    Err(EngineError::ApplyFailure { detail, .. }) => {
                        tracing::warn!(patch = %patch.name, %detail, "fake-install stopped");
                        failure = Some(PatchOutcome {
                            name: patch.name.clone(),
                            passed: false,
                            detail: Some(detail),
                        });
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }

            let comparison = if failure.is_none() {
                self.backend.drop_ledger_table(copy)?;
                let actual = snapshot::normalize(&self.backend.dump(copy, DumpScope::Schema)?);
                match &baseline_schema {
                    Some(expected) => {
                        let label = self.config.baseline.schema.display().to_string();
                        let cmp = snapshot::compare(expected, &actual, &label, "fake-install");
                        if let snapshot::Comparison::Differs { unified_diff } = &cmp {
                            note(
                                &mut warnings,
                                Warning::SchemaDriftDetected {
                                    unified_diff: unified_diff.clone(),
                                },
                            );
                        }
                        Some(cmp)
                    }
                    None => {
                        note(
                            &mut warnings,
                            Warning::NoBaselineToCompare {
                                path: self.config.baseline.schema.clone(),
                            },
                        );
                        None
                    }
                }
            } else {
                None
            };

            Ok(FakeInstallReport {
                live_had_schema,
                pending: pending.into_iter().map(|r| r.name).collect(),
                applied,
                failure,
                comparison,
                warnings,
            })
        })?;

        warnings.append(&mut report.warnings);
        report.warnings = warnings;
        tracing::info!(
            applied = report.applied.len(),
            success = report.success(),
            "fake-install finished"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Install
    // -----------------------------------------------------------------------

    /// Bring the live target up to the ledger file.
    ///
    /// A failing patch aborts immediately; patches applied before it stay
    /// applied and recorded.
    pub fn install(&self) -> Result<InstallReport, EngineError> {
        self.config.validate_target()?;
        let (set, file_ledger, mut warnings) = self.prepare()?;
        let live = Endpoint::from_target(&self.config.target)?;

        let mut initialized_from_baseline = false;
        if !self.backend.has_schema(&live)? {
            let (schema, data) = self.load_baseline(&file_ledger)?;
            tracing::info!(endpoint = %live, "target has no schema; initialising from baseline");
            self.apply_baseline(&live, schema.as_ref(), data.as_ref())?;
            self.backend.create_ledger_table(&live)?;
            self.insert_all(&live, &file_ledger)?;
            initialized_from_baseline = true;
        } else if !self.backend.ledger_table_exists(&live)? {
            self.backend.create_ledger_table(&live)?;
            self.backfill(&live, &file_ledger, &mut warnings)?;
        }

        let table = self.backend.read_ledger_table(&live)?;
        let pending = reconcile(&file_ledger, &table, &mut warnings);
        let patches = resolve(&set, &pending)?;
        tracing::info!(endpoint = %live, pending = patches.len(), "install: applying pending patches");

        let mut applied = Vec::with_capacity(patches.len());
        for patch in patches {
            let record = match apply_patch(&self.backend, &live, patch) {
                Ok(record) => record,
                Err(err) => {
                    tracing::error!(
                        patch = %patch.name,
                        applied = applied.len(),
                        "install aborted; earlier patches remain applied"
                    );
                    return Err(err);
                }
            };
            self.backend.insert_ledger_record(&live, &record)?;
            applied.push(record);
        }

        tracing::info!(applied = applied.len(), "install finished");
        Ok(InstallReport {
            initialized_from_baseline,
            applied,
            warnings,
        })
    }

    // -----------------------------------------------------------------------
    // Status / cleanup
    // -----------------------------------------------------------------------

    /// Where every known patch stands. With `with_target`, the live ledger
    /// table is consulted too. Read-only.
    pub fn status(&self, with_target: bool) -> Result<StatusReport, EngineError> {
        if with_target {
            self.config.validate_target()?;
        } else {
            self.config.validate()?;
        }
        let (set, file_ledger, mut warnings) = self.prepare()?;

        let table = if with_target {
            let live = Endpoint::from_target(&self.config.target)?;
            let table = if self.backend.ledger_table_exists(&live)? {
                self.backend.read_ledger_table(&live)?
            } else {
                Ledger::new()
            };
            reconcile(&file_ledger, &table, &mut warnings);
            Some(table)
        } else {
            None
        };

        let mut names: BTreeSet<&PatchName> = set.patches().iter().map(|p| &p.name).collect();
        names.extend(file_ledger.names());
        if let Some(table) = &table {
            names.extend(table.names());
        }

        let patches = names
            .into_iter()
            .map(|name| {
                let disk = set.get(name);
                let file = file_ledger.get(name);
                let row = table.as_ref().map(|t| t.get(name));
                PatchStatus {
                    name: name.clone(),
                    state: classify(disk, file, row),
                    on_disk: disk.is_some(),
                    in_ledger_file: file.is_some(),
                    in_ledger_table: row.map(|r| r.is_some()),
                }
            })
            .collect();

        Ok(StatusReport { patches, warnings })
    }

    /// Reap instances left behind by earlier runs (best-effort).
    pub fn cleanup(&self) -> CleanupReport {
        self.backend.cleanup_orphans().into()
    }

    // -----------------------------------------------------------------------
    // Shared steps
    // -----------------------------------------------------------------------

    /// Discover patches, read the ledger file, and scan for drift between
    /// the two.
    fn prepare(&self) -> Result<(PatchSet, Ledger, Vec<Warning>), EngineError> {
        let ledger_file = self.config.ledger_file.as_path();
        let staged_ledger = ledger::tmp_path(ledger_file);
        let set = PatchSet::discover(
            &self.config.patch_dir,
            &[ledger_file, staged_ledger.as_path()],
        )?;
        let file_ledger = ledger::read_file(&self.config.ledger_file)?;

        let mut warnings = Vec::new();
        let on_disk = ledger::diff(&file_ledger, &set.as_ledger());
        for m in on_disk.mismatched {
            note(
                &mut warnings,
                Warning::LedgerMismatch {
                    name: m.name,
                    ledger_hash: m.left_hash,
                    other_hash: m.right_hash,
                    source: MismatchSource::PatchFile,
                },
            );
        }
        for record in on_disk.only_in_left {
            note(&mut warnings, Warning::MissingPatchFile { name: record.name });
        }
        Ok((set, file_ledger, warnings))
    }

    /// Accepted baseline artifacts. Refuses to proceed without a schema
    /// baseline when the ledger file already records history.
    fn load_baseline(
        &self,
        file_ledger: &Ledger,
    ) -> Result<(Option<Snapshot>, Option<Snapshot>), EngineError> {
        let schema = baseline::load(&self.config.baseline.schema)?;
        if schema.is_none() && !file_ledger.is_empty() {
            return Err(EngineError::MissingBaseline {
                ledger: self.config.ledger_file.clone(),
                baseline: self.config.baseline.schema.clone(),
            });
        }
        let data = match &self.config.baseline.data {
            Some(path) => baseline::load(path)?,
            None => None,
        };
        Ok((schema, data))
    }

    fn apply_baseline(
        &self,
        target: &Endpoint,
        schema: Option<&Snapshot>,
        data: Option<&Snapshot>,
    ) -> Result<(), EngineError> {
        self.backend.ensure_namespace(target)?;
        if let Some(schema) = schema {
            self.run_labelled(target, BASELINE_SCHEMA_LABEL, schema)?;
        }
        if let Some(data) = data {
            self.run_labelled(target, BASELINE_DATA_LABEL, data)?;
        }
        Ok(())
    }

    fn run_labelled(&self, target: &Endpoint, label: &str, script: &Snapshot) -> Result<(), EngineError> {
        if script.is_empty() {
            return Ok(());
        }
        self.backend
            .run_script(target, label, script.as_str().as_bytes())
            .map_err(|err| EngineError::ApplyFailure {
                patch: label.to_string(),
                detail: err.to_string(),
            })
    }

    fn insert_all(&self, target: &Endpoint, ledger: &Ledger) -> Result<(), EngineError> {
        for record in ledger.records() {
            self.backend.insert_ledger_record(target, record)?;
        }
        Ok(())
    }

    /// Fill a freshly created ledger table from the ledger file: the target
    /// predates ledger tables, so everything distributed is assumed applied.
    fn backfill(
        &self,
        target: &Endpoint,
        file_ledger: &Ledger,
        warnings: &mut Vec<Warning>,
    ) -> Result<(), EngineError> {
        self.insert_all(target, file_ledger)?;
        note(
            warnings,
            Warning::LedgerBackfilled {
                count: file_ledger.len(),
            },
        );
        Ok(())
    }

    /// Create an instance, run `work` against it, and tear it down on every
    /// path. Returns the kept instance directory when `keep` is set.
    fn with_instance<T>(
        &self,
        keep: bool,
        work: impl FnOnce(&Endpoint) -> Result<T, EngineError>,
    ) -> Result<(T, Option<PathBuf>), EngineError> {
        if self.config.instance.skip_cleanup {
            tracing::debug!("skipping orphan cleanup");
        } else {
            let report = self.backend.cleanup_orphans();
            if !report.reaped.is_empty() {
                tracing::info!(reaped = report.reaped.len(), "cleaned up orphaned instances");
            }
        }

        let handle = self.backend.launch()?;
        let endpoint = handle.endpoint.clone();
        match work(&endpoint) {
            Ok(value) => {
                let kept = self.backend.teardown(handle, keep)?;
                Ok((value, kept))
            }
            Err(err) => {
                if let Err(teardown_err) = self.backend.teardown(handle, keep) {
                    tracing::warn!(error = %teardown_err, "failed to tear down instance after error");
                }
                Err(err)
            }
        }
    }
}

fn note(warnings: &mut Vec<Warning>, warning: Warning) {
    tracing::warn!("{warning}");
    warnings.push(warning);
}

/// Compare the ledger file with a ledger table: warn on hash mismatches and
/// on table entries the file does not know, and return what is pending.
fn reconcile(
    file_ledger: &Ledger,
    table: &Ledger,
    warnings: &mut Vec<Warning>,
) -> Vec<AppliedPatchRecord> {
    let diff = ledger::diff(file_ledger, table);
    for m in diff.mismatched {
        note(
            warnings,
            Warning::LedgerMismatch {
                name: m.name,
                ledger_hash: m.left_hash,
                other_hash: m.right_hash,
                source: MismatchSource::LedgerTable,
            },
        );
    }
    for record in diff.only_in_right {
        note(warnings, Warning::UnknownAppliedPatch { name: record.name });
    }
    diff.only_in_left
}

/// Patch files for pending ledger entries, all or nothing.
fn resolve<'a>(
    set: &'a PatchSet,
    pending: &[AppliedPatchRecord],
) -> Result<Vec<&'a Patch>, EngineError> {
    pending
        .iter()
        .map(|record| {
            set.get(&record.name)
                .ok_or_else(|| EngineError::PatchFileMissing {
                    name: record.name.clone(),
                })
        })
        .collect()
}

fn classify(
    disk: Option<&Patch>,
    file: Option<&AppliedPatchRecord>,
    table: Option<Option<&AppliedPatchRecord>>,
) -> PatchState {
    let disk_drift = matches!((disk, file), (Some(d), Some(f)) if d.hash != f.hash);
    let table_drift = matches!((file, table), (Some(f), Some(Some(t))) if f.hash != t.hash);
    match (file, table) {
        _ if disk_drift || table_drift => PatchState::Drift,
        (Some(_), _) if disk.is_none() => PatchState::MissingFile,
        (None, Some(Some(_))) => PatchState::Unknown,
        (None, _) => PatchState::Pending,
        (Some(_), Some(Some(_))) => PatchState::Installed,
        (Some(_), _) => PatchState::Distributed,
    }
}
