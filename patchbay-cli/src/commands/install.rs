//! `patchbay install` — apply distributed patches to the live target.

use anyhow::{Context, Result};
use clap::Args;

use super::{engine, fake_prefix, load_config, print_json, print_warnings};
use crate::GlobalArgs;

/// Arguments for `patchbay install`.
#[derive(Args, Debug)]
pub struct InstallArgs {}

impl InstallArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<bool> {
        let config = load_config(global)?;
        let prefix = fake_prefix(&config);
        let database = config.target.database.clone().unwrap_or_default();
        let report = engine(config)
            .install()
            .with_context(|| format!("install into '{database}' failed"))?;

        if global.json {
            print_json(&report)?;
            return Ok(true);
        }

        print_warnings(&report.warnings);
        if report.initialized_from_baseline {
            println!("{prefix}✓ '{database}' initialized from baseline");
        }
        for record in &report.applied {
            println!("{prefix}  installed {}", record.name);
        }
        if !report.initialized_from_baseline && report.applied.is_empty() {
            println!("{prefix}✓ '{database}' is up to date");
        } else if !report.applied.is_empty() {
            println!("{prefix}✓ {} patch(es) installed", report.applied.len());
        }
        Ok(true)
    }
}
