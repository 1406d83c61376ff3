//! Capability traits implemented once per database engine.
//!
//! The engine never talks to a database directly; it goes through these
//! four seams. [`postgres::PostgresBackend`] runs the real client tools,
//! [`dry_run::DryRunBackend`] only logs what it would do.

pub mod dry_run;
pub mod postgres;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use patchbay_core::config::TargetConfig;
use patchbay_core::{AppliedPatchRecord, ConfigError, EngineConfig, Ledger};
use patchbay_instance::{EphemeralInstance, OrphanReport};

use crate::error::EngineError;

pub use dry_run::DryRunBackend;
pub use postgres::PostgresBackend;

/// Where a client connects: a live target or an ephemeral instance socket.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Hostname or socket directory. `None` lets the client pick its default.
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub database: String,
    #[serde(skip)]
    pub password: Option<String>,
}

impl Endpoint {
    /// The live target from configuration.
    pub fn from_target(target: &TargetConfig) -> Result<Self, ConfigError> {
        let database = target
            .database
            .clone()
            .ok_or(ConfigError::Missing {
                field: "target.database",
            })?;
        Ok(Self {
            host: target.host.clone(),
            port: target.port,
            user: target.user.clone(),
            database,
            password: target.password.clone(),
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        match &self.host {
            Some(host) => write!(f, "{host}:{}/{}", self.port, self.database),
            None => write!(f, ":{}/{}", self.port, self.database),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A launched disposable instance and how to reach it.
#[derive(Debug)]
pub struct InstanceHandle {
    pub endpoint: Endpoint,
    instance: Option<EphemeralInstance>,
}

impl InstanceHandle {
    pub fn new(endpoint: Endpoint, instance: Option<EphemeralInstance>) -> Self {
        Self { endpoint, instance }
    }

    /// Instance directory, when the backend runs a real server.
    pub fn root(&self) -> Option<&Path> {
        self.instance.as_ref().map(|i| i.root())
    }

    pub fn into_instance(self) -> Option<EphemeralInstance> {
        self.instance
    }
}

/// What [`SchemaSnapshot::dump`] extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpScope {
    Schema,
    Data,
}

/// Disposable instance lifecycle.
pub trait InstanceLifecycle {
    /// Create an instance and wait until it accepts connections.
    fn launch(&self) -> Result<InstanceHandle, EngineError>;

    /// Stop and remove the instance, or leave it running when `keep` is set.
    /// Returns the directory of a kept instance.
    fn teardown(&self, handle: InstanceHandle, keep: bool) -> Result<Option<PathBuf>, EngineError>;

    /// Best-effort reaping of instances left behind by earlier runs.
    fn cleanup_orphans(&self) -> OrphanReport;
}

/// Hands scripts verbatim to the engine's client, stopping at the first
/// error.
pub trait PatchApplier {
    fn run_script(&self, target: &Endpoint, label: &str, script: &[u8]) -> Result<(), EngineError>;
}

/// Raw dumps and namespace probes. Normalization lives in
/// [`crate::snapshot`].
pub trait SchemaSnapshot {
    /// Raw dump of the configured namespace.
    fn dump(&self, target: &Endpoint, scope: DumpScope) -> Result<String, EngineError>;

    /// Whether the configured namespace holds any relation at all.
    fn has_schema(&self, target: &Endpoint) -> Result<bool, EngineError>;

    /// Create the configured namespace if it does not exist.
    fn ensure_namespace(&self, target: &Endpoint) -> Result<(), EngineError>;
}

/// The ledger table inside a database.
pub trait LedgerTable {
    fn ledger_table_exists(&self, target: &Endpoint) -> Result<bool, EngineError>;
    fn create_ledger_table(&self, target: &Endpoint) -> Result<(), EngineError>;
    fn read_ledger_table(&self, target: &Endpoint) -> Result<Ledger, EngineError>;
    fn insert_ledger_record(
        &self,
        target: &Endpoint,
        record: &AppliedPatchRecord,
    ) -> Result<(), EngineError>;
    fn drop_ledger_table(&self, target: &Endpoint) -> Result<(), EngineError>;
}

/// Everything the workflows need from an engine.
pub trait Backend: InstanceLifecycle + PatchApplier + SchemaSnapshot + LedgerTable {}

impl<T> Backend for T where T: InstanceLifecycle + PatchApplier + SchemaSnapshot + LedgerTable {}

/// Select the backend for `config`: dry-run when `fake` is set, otherwise
/// the configured engine.
pub fn for_config(config: &EngineConfig) -> AnyBackend {
    if config.fake {
        AnyBackend::DryRun(DryRunBackend::from_config(config))
    } else {
        AnyBackend::Postgres(PostgresBackend::from_config(config))
    }
}

/// Backend chosen at runtime from configuration.
#[derive(Debug)]
pub enum AnyBackend {
    Postgres(PostgresBackend),
    DryRun(DryRunBackend),
}

macro_rules! dispatch {
    ($self:ident, $b:ident => $body:expr) => {
        match $self {
            AnyBackend::Postgres($b) => $body,
            AnyBackend::DryRun($b) => $body,
        }
    };
}

impl InstanceLifecycle for AnyBackend {
    fn launch(&self) -> Result<InstanceHandle, EngineError> {
        dispatch!(self, b => b.launch())
    }

    fn teardown(&self, handle: InstanceHandle, keep: bool) -> Result<Option<PathBuf>, EngineError> {
        dispatch!(self, b => b.teardown(handle, keep))
    }

    fn cleanup_orphans(&self) -> OrphanReport {
        dispatch!(self, b => b.cleanup_orphans())
    }
}

impl PatchApplier for AnyBackend {
    fn run_script(&self, target: &Endpoint, label: &str, script: &[u8]) -> Result<(), EngineError> {
        dispatch!(self, b => b.run_script(target, label, script))
    }
}

impl SchemaSnapshot for AnyBackend {
    fn dump(&self, target: &Endpoint, scope: DumpScope) -> Result<String, EngineError> {
        dispatch!(self, b => b.dump(target, scope))
    }

    fn has_schema(&self, target: &Endpoint) -> Result<bool, EngineError> {
        dispatch!(self, b => b.has_schema(target))
    }

    fn ensure_namespace(&self, target: &Endpoint) -> Result<(), EngineError> {
        dispatch!(self, b => b.ensure_namespace(target))
    }
}

impl LedgerTable for AnyBackend {
    fn ledger_table_exists(&self, target: &Endpoint) -> Result<bool, EngineError> {
        dispatch!(self, b => b.ledger_table_exists(target))
    }

    fn create_ledger_table(&self, target: &Endpoint) -> Result<(), EngineError> {
        dispatch!(self, b => b.create_ledger_table(target))
    }

    fn read_ledger_table(&self, target: &Endpoint) -> Result<Ledger, EngineError> {
        dispatch!(self, b => b.read_ledger_table(target))
    }

    fn insert_ledger_record(
        &self,
        target: &Endpoint,
        record: &AppliedPatchRecord,
    ) -> Result<(), EngineError> {
        dispatch!(self, b => b.insert_ledger_record(target, record))
    }

    fn drop_ledger_table(&self, target: &Endpoint) -> Result<(), EngineError> {
        dispatch!(self, b => b.drop_ledger_table(target))
    }
}
