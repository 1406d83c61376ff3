//! Engine configuration.
//!
//! Loaded once from `patchbay.yaml` and passed explicitly into every
//! workflow. Relative paths in the file are resolved against the directory
//! that contains it.
//!
//! ```yaml
//! patch_dir: patches
//! ledger_file: patches/ledger.tsv
//! baseline:
//!   schema: baseline/schema.sql
//!   data: baseline/data.sql
//! namespace: app
//! target:
//!   host: db.internal
//!   database: app
//!   user: deploy
//! instance:
//!   ready_timeout_secs: 60
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "patchbay.yaml";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Database engine backing the instances and targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Postgres,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Postgres => write!(f, "postgres"),
        }
    }
}

/// Accepted baseline artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub schema: PathBuf,
    /// Optional data-only snapshot (seed data).
    pub data: Option<PathBuf>,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            schema: PathBuf::from("baseline").join("schema.sql"),
            data: None,
        }
    }
}

/// Connection parameters for the live target used by install/fake-install.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 5432,
            user: None,
            database: None,
            password: None,
        }
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Ephemeral instance settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Directory that holds instance directories; system temp dir when unset.
    pub base_dir: Option<PathBuf>,
    /// Naming convention shared by every instance directory (and by orphan
    /// cleanup).
    pub prefix: String,
    pub ready_timeout_secs: u64,
    /// Leave the test instance running for inspection.
    pub keep_running: bool,
    /// Skip the host-wide orphan scan before creating an instance.
    pub skip_cleanup: bool,
    /// Graceful-stop polls before escalating to SIGKILL.
    pub stop_polls: u32,
    pub superuser: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            prefix: "patchbay-".to_string(),
            ready_timeout_secs: 30,
            keep_running: false,
            skip_cleanup: false,
            stop_polls: 10,
            superuser: "postgres".to_string(),
        }
    }
}

impl InstanceConfig {
    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

/// Client/server executables. Bare names are resolved through `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinariesConfig {
    pub initdb: PathBuf,
    pub postgres: PathBuf,
    pub psql: PathBuf,
    pub pg_dump: PathBuf,
}

impl Default for BinariesConfig {
    fn default() -> Self {
        Self {
            initdb: PathBuf::from("initdb"),
            postgres: PathBuf::from("postgres"),
            psql: PathBuf::from("psql"),
            pg_dump: PathBuf::from("pg_dump"),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Everything a workflow needs, threaded explicitly through the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineKind,
    pub patch_dir: PathBuf,
    pub ledger_file: PathBuf,
    pub baseline: BaselineConfig,
    /// Schema namespace that dumps are restricted to.
    pub namespace: String,
    /// Ledger table name; the table lives in `namespace`.
    pub ledger_table: String,
    pub target: TargetConfig,
    pub instance: InstanceConfig,
    pub binaries: BinariesConfig,
    /// Log external calls instead of running them; write no artifacts.
    pub fake: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            patch_dir: PathBuf::from("patches"),
            ledger_file: PathBuf::from("patches").join("ledger.tsv"),
            baseline: BaselineConfig::default(),
            namespace: "public".to_string(),
            ledger_table: "patch_ledger".to_string(),
            target: TargetConfig::default(),
            instance: InstanceConfig::default(),
            binaries: BinariesConfig::default(),
            fake: false,
        }
    }
}

impl EngineConfig {
    /// Load from a YAML file and resolve relative paths against its directory.
    pub fn load_at(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config: EngineConfig =
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_relative_to(base);
        Ok(config)
    }

    /// Defaults rooted at `root`, for projects without a config file.
    pub fn rooted_at(root: &Path) -> Self {
        let mut config = Self::default();
        config.resolve_relative_to(root);
        config
    }

    /// Rebase every relative path onto `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        rebase(&mut self.patch_dir);
        rebase(&mut self.ledger_file);
        rebase(&mut self.baseline.schema);
        if let Some(data) = self.baseline.data.as_mut() {
            rebase(data);
        }
        if let Some(dir) = self.instance.base_dir.as_mut() {
            rebase(dir);
        }
    }

    /// Checks that hold for every workflow.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_plain_identifier(&self.namespace) {
            return Err(ConfigError::Invalid {
                field: "namespace",
                reason: format!("'{}' is not a plain SQL identifier", self.namespace),
            });
        }
        if !is_plain_identifier(&self.ledger_table) {
            return Err(ConfigError::Invalid {
                field: "ledger_table",
                reason: format!("'{}' is not a plain SQL identifier", self.ledger_table),
            });
        }
        if self.instance.ready_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "instance.ready_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.instance.prefix.is_empty() || self.instance.prefix.contains('/') {
            return Err(ConfigError::Invalid {
                field: "instance.prefix",
                reason: "must be a non-empty file name prefix".to_string(),
            });
        }
        Ok(())
    }

    /// Additional checks for workflows that touch the live target.
    pub fn validate_target(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.target.database.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Missing {
                field: "target.database",
            });
        }
        Ok(())
    }
}

/// Plain identifiers (`[A-Za-z_][A-Za-z0-9_]*`) that never need quoting tricks.
fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
