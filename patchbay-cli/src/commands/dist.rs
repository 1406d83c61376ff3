//! `patchbay dist` — fold pending patches into the baseline.

use anyhow::{Context, Result};
use clap::Args;

use patchbay_engine::baseline::WriteResult;
use patchbay_engine::DistributeReport;

use super::{engine, fake_prefix, load_config, print_json, print_warnings};
use crate::GlobalArgs;

/// Arguments for `patchbay dist`.
#[derive(Args, Debug)]
pub struct DistArgs {}

impl DistArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<bool> {
        let config = load_config(global)?;
        let prefix = fake_prefix(&config);
        let report = engine(config).distribute().context("distribute failed")?;

        if global.json {
            print_json(&report)?;
        } else {
            print_report(prefix, &report);
        }
        Ok(true)
    }
}

fn print_report(prefix: &str, report: &DistributeReport) {
    print_warnings(&report.warnings);

    if report.applied.is_empty() {
        println!("{prefix}✓ nothing pending");
    } else {
        for record in &report.applied {
            println!("{prefix}  applied {}", record.name);
        }
        println!(
            "{prefix}✓ {} patch(es) distributed, {} ledger line(s) appended",
            report.applied.len(),
            report.ledger_appended
        );
    }

    for write in &report.writes {
        let verb = match write {
            WriteResult::Written(_) => "wrote",
            WriteResult::Unchanged(_) => "unchanged",
            WriteResult::WouldWrite(_) => "would write",
        };
        println!("{prefix}  {verb} {}", write.path().display());
    }
}
