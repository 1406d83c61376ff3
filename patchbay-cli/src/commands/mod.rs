pub mod cleanup;
pub mod dist;
pub mod fake_install;
pub mod install;
pub mod status;

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;

use patchbay_core::config::{EngineConfig, DEFAULT_CONFIG_FILE};
use patchbay_engine::{AnyBackend, ReconciliationEngine, Warning};

use crate::GlobalArgs;

/// Resolve the project configuration and apply flag overrides.
pub fn load_config(global: &GlobalArgs) -> Result<EngineConfig> {
    let mut config = match &global.config {
        Some(path) => EngineConfig::load_at(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            EngineConfig::load_at(Path::new(DEFAULT_CONFIG_FILE))
                .with_context(|| format!("failed to load config {DEFAULT_CONFIG_FILE}"))?
        }
        None => {
            let cwd = std::env::current_dir().context("could not determine current directory")?;
            EngineConfig::rooted_at(&cwd)
        }
    };
    if global.fake {
        config.fake = true;
    }
    if global.skip_cleanup {
        config.instance.skip_cleanup = true;
    }
    Ok(config)
}

pub fn engine(config: EngineConfig) -> ReconciliationEngine<AnyBackend> {
    ReconciliationEngine::from_config(config)
}

pub fn print_json<T: Serialize>(report: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(report).context("failed to serialize report JSON")?
    );
    Ok(())
}

pub fn print_warnings(warnings: &[Warning]) {
    for warning in warnings {
        println!("{} {warning}", "warning:".yellow().bold());
    }
}

pub fn fake_prefix(config: &EngineConfig) -> &'static str {
    if config.fake {
        "[fake] "
    } else {
        ""
    }
}
