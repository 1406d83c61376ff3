//! Ephemeral database instances: private directories, server processes,
//! readiness polling, graceful stop, and orphan cleanup.

pub mod backoff;
pub mod command;
mod error;
pub mod instance;
pub mod orphans;
pub mod paths;
pub mod process;

pub use backoff::{poll_until, Backoff, PollLimit, PollOutcome};
pub use error::InstanceError;
pub use instance::{EphemeralInstance, InstanceEngine, InstanceOptions, InstanceState};
pub use orphans::{cleanup_orphans, OrphanFailure, OrphanReport};
pub use paths::InstanceLayout;
pub use process::{StopOutcome, StopPolicy};
