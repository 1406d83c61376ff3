//! `patchbay status` — where every known patch stands.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use patchbay_engine::report::PatchStatus;
use patchbay_engine::{PatchState, StatusReport};

use super::{engine, load_config, print_json, print_warnings};
use crate::GlobalArgs;

/// Arguments for `patchbay status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Also read the live target's ledger table.
    #[arg(long)]
    pub target: bool,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "patch")]
    patch: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "on disk")]
    on_disk: &'static str,
    #[tabled(rename = "ledger file")]
    ledger_file: &'static str,
    #[tabled(rename = "ledger table")]
    ledger_table: &'static str,
}

impl StatusArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<bool> {
        let config = load_config(global)?;
        let report = engine(config)
            .status(self.target)
            .context("status check failed")?;

        if global.json {
            print_json(&report)?;
        } else {
            print_table(&report);
        }
        Ok(true)
    }
}

fn print_table(report: &StatusReport) {
    print_warnings(&report.warnings);

    if report.patches.is_empty() {
        println!("No patches found.");
        return;
    }

    let rows: Vec<StatusTableRow> = report.patches.iter().map(row).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    let pending = count(report, PatchState::Pending);
    let distributed = count(report, PatchState::Distributed);
    println!(
        "{} patches | {} pending | {} distributed | {} installed",
        report.patches.len(),
        pending,
        distributed,
        count(report, PatchState::Installed),
    );
    if pending > 0 {
        println!("Run 'patchbay test' then 'patchbay dist' to publish pending patches.");
    }
}

fn row(status: &PatchStatus) -> StatusTableRow {
    StatusTableRow {
        patch: status.name.to_string(),
        state: state_label(status.state),
        on_disk: yes_no(status.on_disk),
        ledger_file: yes_no(status.in_ledger_file),
        ledger_table: status.in_ledger_table.map_or("-", yes_no),
    }
}

fn count(report: &StatusReport, state: PatchState) -> usize {
    report.patches.iter().filter(|p| p.state == state).count()
}

fn state_label(state: PatchState) -> String {
    let label = state.label().to_uppercase();
    match state {
        PatchState::Installed => label.green().bold().to_string(),
        PatchState::Distributed => label.cyan().to_string(),
        PatchState::Pending => label.yellow().to_string(),
        PatchState::Drift | PatchState::MissingFile => label.red().bold().to_string(),
        PatchState::Unknown => label.magenta().to_string(),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
