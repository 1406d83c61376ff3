//! patchbay core library — patch discovery, ledgers, configuration, errors.
//!
//! - [`types`] — [`PatchName`], [`Patch`], [`AppliedPatchRecord`]
//! - [`patch_set`] — ordered discovery and the "pending" subset
//! - [`ledger`] — file ledger read/append and the pure ledger diff
//! - [`config`] — [`EngineConfig`], loaded from YAML
//! - [`error`] — [`PatchError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod hash;
pub mod ledger;
pub mod patch_set;
pub mod types;

pub use config::EngineConfig;
pub use error::{ConfigError, PatchError};
pub use ledger::{HashMismatch, Ledger, LedgerDiff};
pub use patch_set::PatchSet;
pub use types::{AppliedPatchRecord, Patch, PatchName};
