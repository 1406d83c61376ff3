//! patchbay — schema patch reconciliation CLI.
//!
//! # Usage
//!
//! ```text
//! patchbay [--config <file>] [--fake] [--skip-cleanup] [--json] [-q|--debug] <command>
//!
//! patchbay dist
//! patchbay test [--keep]
//! patchbay fake-install
//! patchbay install
//! patchbay status [--target]
//! patchbay cleanup
//! ```

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use commands::{
    cleanup::CleanupArgs, dist::DistArgs, fake_install::FakeInstallArgs, install::InstallArgs,
    status::StatusArgs, test::TestArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "patchbay",
    version,
    about = "Reconcile schema patches, baselines and live databases",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Project configuration file. Defaults to `patchbay.yaml` in the current
    /// directory, or built-in defaults when that file does not exist.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "debug")]
    pub quiet: bool,

    /// Log every external command and intermediate step.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log external calls instead of running them; write no artifacts.
    #[arg(long, global = true)]
    pub fake: bool,

    /// Do not reap orphaned instances and leave the test instance running.
    #[arg(long, global = true)]
    pub skip_cleanup: bool,

    /// Emit machine-readable JSON reports.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending patches on top of the baseline and publish the result.
    Dist(DistArgs),

    /// Try every pending patch against a scratch instance.
    Test(TestArgs),

    /// Rehearse an install against a copy of the live schema.
    FakeInstall(FakeInstallArgs),

    /// Bring the live target up to date with the ledger file.
    Install(InstallArgs),

    /// Show where every known patch stands.
    Status(StatusArgs),

    /// Stop and remove instances left behind by earlier runs.
    Cleanup(CleanupArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli.global);

    let clean = match cli.command {
        Commands::Dist(args) => args.run(&cli.global)?,
        Commands::Test(args) => args.run(&cli.global)?,
        Commands::FakeInstall(args) => args.run(&cli.global)?,
        Commands::Install(args) => args.run(&cli.global)?,
        Commands::Status(args) => args.run(&cli.global)?,
        Commands::Cleanup(args) => args.run(&cli.global)?,
    };

    Ok(if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// `RUST_LOG` wins; otherwise the verbosity flags pick the level.
fn init_tracing(global: &GlobalArgs) {
    use tracing_subscriber::{fmt, EnvFilter};

    let fallback = if global.quiet {
        "warn"
    } else if global.debug {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
