//! Backend for `fake` mode: every external call is logged and answered
//! with an empty success.
//!
//! The fake target looks like an existing database whose ledger table is
//! empty, so install rehearsals walk the apply path for every ledger entry.

use std::cell::Cell;
use std::path::PathBuf;

use patchbay_core::{AppliedPatchRecord, EngineConfig, Ledger};
use patchbay_instance::OrphanReport;

use super::{
    DumpScope, Endpoint, InstanceHandle, InstanceLifecycle, LedgerTable, PatchApplier,
    SchemaSnapshot,
};
use crate::error::EngineError;

#[derive(Debug)]
pub struct DryRunBackend {
    prefix: String,
    base_dir: PathBuf,
    launched: Cell<u32>,
}

impl DryRunBackend {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            prefix: config.instance.prefix.clone(),
            base_dir: config.instance.base_dir(),
            launched: Cell::new(0),
        }
    }
}

impl InstanceLifecycle for DryRunBackend {
    fn launch(&self) -> Result<InstanceHandle, EngineError> {
        let n = self.launched.get() + 1;
        self.launched.set(n);
        let database = format!("{}fake-{n}", self.prefix);
        tracing::info!(instance = %database, "[fake] would create ephemeral instance");
        Ok(InstanceHandle::new(
            Endpoint {
                host: None,
                port: 0,
                user: None,
                database,
                password: None,
            },
            None,
        ))
    }

    fn teardown(&self, handle: InstanceHandle, keep: bool) -> Result<Option<PathBuf>, EngineError> {
        let verb = if keep { "leave running" } else { "tear down" };
        tracing::info!(instance = %handle.endpoint.database, "[fake] would {verb} ephemeral instance");
        Ok(None)
    }

    fn cleanup_orphans(&self) -> OrphanReport {
        tracing::info!(
            base = %self.base_dir.display(),
            prefix = %self.prefix,
            "[fake] would reap orphaned instances",
        );
        OrphanReport::default()
    }
}

impl PatchApplier for DryRunBackend {
    fn run_script(&self, target: &Endpoint, label: &str, script: &[u8]) -> Result<(), EngineError> {
        tracing::info!(script = label, endpoint = %target, bytes = script.len(), "[fake] would run script");
        Ok(())
    }
}

impl SchemaSnapshot for DryRunBackend {
    fn dump(&self, target: &Endpoint, scope: DumpScope) -> Result<String, EngineError> {
        tracing::info!(endpoint = %target, ?scope, "[fake] would dump");
        Ok(String::new())
    }

    fn has_schema(&self, target: &Endpoint) -> Result<bool, EngineError> {
        tracing::info!(endpoint = %target, "[fake] would probe for an existing schema");
        Ok(true)
    }

    fn ensure_namespace(&self, target: &Endpoint) -> Result<(), EngineError> {
        tracing::info!(endpoint = %target, "[fake] would create namespace");
        Ok(())
    }
}

impl LedgerTable for DryRunBackend {
    fn ledger_table_exists(&self, target: &Endpoint) -> Result<bool, EngineError> {
        tracing::info!(endpoint = %target, "[fake] would look up ledger table");
        Ok(true)
    }

    fn create_ledger_table(&self, target: &Endpoint) -> Result<(), EngineError> {
        tracing::info!(endpoint = %target, "[fake] would create ledger table");
        Ok(())
    }

    fn read_ledger_table(&self, target: &Endpoint) -> Result<Ledger, EngineError> {
        tracing::info!(endpoint = %target, "[fake] would read ledger table");
        Ok(Ledger::new())
    }

    fn insert_ledger_record(
        &self,
        target: &Endpoint,
        record: &AppliedPatchRecord,
    ) -> Result<(), EngineError> {
        tracing::info!(endpoint = %target, patch = %record.name, "[fake] would record patch");
        Ok(())
    }

    fn drop_ledger_table(&self, target: &Endpoint) -> Result<(), EngineError> {
        tracing::info!(endpoint = %target, "[fake] would drop ledger table");
        Ok(())
    }
}
