//! `patchbay cleanup` — reap instances left behind by earlier runs.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::{engine, load_config, print_json};
use crate::GlobalArgs;

/// Arguments for `patchbay cleanup`.
#[derive(Args, Debug)]
pub struct CleanupArgs {}

impl CleanupArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<bool> {
        let config = load_config(global)?;
        let report = engine(config).cleanup();

        if global.json {
            print_json(&report)?;
            return Ok(report.failed.is_empty());
        }

        for pid in &report.stopped {
            println!("  stopped pid {pid}");
        }
        for path in &report.reaped {
            println!("  removed {}", path.display());
        }
        for (path, reason) in &report.failed {
            println!("{} {}: {reason}", "failed".red(), path.display());
        }
        if report.reaped.is_empty() && report.failed.is_empty() {
            println!("✓ no orphaned instances");
        }
        Ok(report.failed.is_empty())
    }
}
