//! patchbay engine — applies patches to databases and reconciles the ledger
//! file with the ledger table.
//!
//! - [`backend`] — capability traits and the PostgreSQL / dry-run backends
//! - [`applier`] — one patch onto one database, hash-checked
//! - [`snapshot`] — dump normalization and comparison
//! - [`baseline`] — accepted snapshot files, hash-gated atomic publish
//! - [`engine`] — [`ReconciliationEngine`] and its workflows
//! - [`report`] — serializable workflow results and warnings

pub mod applier;
pub mod backend;
pub mod baseline;
pub mod engine;
pub mod error;
mod exec;
pub mod report;
pub mod snapshot;

pub use backend::{AnyBackend, Backend, DumpScope, Endpoint, InstanceHandle};
pub use engine::ReconciliationEngine;
pub use error::EngineError;
pub use report::{
    CleanupReport, DistributeReport, FakeInstallReport, InstallReport, PatchState, StatusReport,
    TestReport, Warning,
};
pub use snapshot::{Comparison, Snapshot};
