//! `patchbay fake-install` — rehearse an install on a copy of the live schema.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use patchbay_engine::{Comparison, FakeInstallReport};

use super::{engine, load_config, print_json, print_warnings};
use crate::GlobalArgs;

/// Arguments for `patchbay fake-install`.
#[derive(Args, Debug)]
pub struct FakeInstallArgs {}

impl FakeInstallArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<bool> {
        let config = load_config(global)?;
        let report = engine(config).fake_install().context("fake-install failed")?;

        if global.json {
            print_json(&report)?;
        } else {
            print_report(&report);
        }
        Ok(report.success())
    }
}

fn print_report(report: &FakeInstallReport) {
    print_warnings(&report.warnings);

    if !report.live_had_schema {
        println!("live target is empty; rehearsed from baseline");
    }
    for name in &report.pending {
        let mark = if report.applied.iter().any(|r| &r.name == name) {
            "ok".green().to_string()
        } else if report.failure.as_ref().is_some_and(|f| &f.name == name) {
            "FAILED".red().bold().to_string()
        } else {
            "skipped".bright_black().to_string()
        };
        println!("  {name} ... {mark}");
    }
    if let Some(failure) = &report.failure {
        if let Some(detail) = &failure.detail {
            println!("{detail}");
        }
        println!("{} rehearsal stopped at {}", "✗".red(), failure.name);
        return;
    }

    match &report.comparison {
        Some(Comparison::Equal) => println!("✓ result matches the baseline"),
        Some(Comparison::Differs { unified_diff }) => {
            print!("{unified_diff}");
            if !unified_diff.ends_with('\n') {
                println!();
            }
            println!("{} result differs from the baseline", "!".yellow().bold());
        }
        None => println!("✓ rehearsal applied cleanly (no baseline to compare)"),
    }
}
