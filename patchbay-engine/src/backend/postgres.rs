//! PostgreSQL backend: `initdb`/`postgres` for ephemeral instances,
//! `psql` for scripts and queries, `pg_dump` for snapshots.

use std::path::PathBuf;
use std::process::Command;

use chrono::{DateTime, Utc};

use patchbay_core::config::BinariesConfig;
use patchbay_core::{AppliedPatchRecord, EngineConfig, Ledger, PatchName};
use patchbay_instance::{
    cleanup_orphans, EphemeralInstance, InstanceEngine, InstanceLayout, InstanceOptions,
    OrphanReport, StopPolicy,
};

use super::{
    DumpScope, Endpoint, InstanceHandle, InstanceLifecycle, LedgerTable, PatchApplier,
    SchemaSnapshot,
};
use crate::error::EngineError;
use crate::exec;

/// Logged by the postmaster once it accepts connections.
pub const READY_MARKER: &str = "database system is ready to accept connections";

/// Port number baked into the socket file name; nothing listens on TCP.
const SOCKET_PORT: u16 = 5432;

#[derive(Debug, Clone)]
pub struct PostgresBackend {
    binaries: BinariesConfig,
    namespace: String,
    ledger_table: String,
    superuser: String,
    options: InstanceOptions,
    ready_timeout: std::time::Duration,
}

impl PostgresBackend {
    pub fn from_config(config: &EngineConfig) -> Self {
        let stop = StopPolicy {
            graceful_polls: config.instance.stop_polls,
            ..StopPolicy::default()
        };
        Self {
            binaries: config.binaries.clone(),
            namespace: config.namespace.clone(),
            ledger_table: config.ledger_table.clone(),
            superuser: config.instance.superuser.clone(),
            options: InstanceOptions {
                base_dir: config.instance.base_dir(),
                prefix: config.instance.prefix.clone(),
                stop,
            },
            ready_timeout: config.instance.ready_timeout(),
        }
    }

    fn qualified_ledger_table(&self) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.namespace),
            quote_ident(&self.ledger_table)
        )
    }

    fn psql(&self, target: &Endpoint) -> Command {
        let mut cmd = Command::new(&self.binaries.psql);
        cmd.args(["-X", "-q", "-v", "ON_ERROR_STOP=1"]);
        connection_args(&mut cmd, target);
        cmd.arg("-d").arg(&target.database);
        cmd
    }

    /// Run one statement and return its rows, tab separated.
    fn query(&self, target: &Endpoint, sql: &str) -> Result<Vec<Vec<String>>, EngineError> {
        let mut cmd = self.psql(target);
        cmd.args(["-A", "-t", "-F", "\t", "-c", sql]);
        let out = exec::run(cmd, None)?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| l.split('\t').map(str::to_string).collect())
            .collect())
    }

    fn execute(&self, target: &Endpoint, sql: &str) -> Result<(), EngineError> {
        let mut cmd = self.psql(target);
        cmd.args(["-c", sql]);
        exec::run(cmd, None).map(|_| ())
    }

    fn query_bool(&self, target: &Endpoint, sql: &str) -> Result<bool, EngineError> {
        let rows = self.query(target, sql)?;
        match rows.first().and_then(|r| r.first()).map(String::as_str) {
            Some("t") => Ok(true),
            Some("f") => Ok(false),
            _ => Err(EngineError::UnexpectedOutput {
                command: sql.to_string(),
                output: format!("{rows:?}"),
            }),
        }
    }
}

fn connection_args(cmd: &mut Command, target: &Endpoint) {
    if let Some(host) = &target.host {
        cmd.arg("-h").arg(host);
    }
    cmd.arg("-p").arg(target.port.to_string());
    if let Some(user) = &target.user {
        cmd.arg("-U").arg(user);
    }
    if let Some(password) = &target.password {
        cmd.env("PGPASSWORD", password);
    }
}

/// Double-quote an identifier for use in SQL.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Single-quote a string literal for use in SQL.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl InstanceEngine for PostgresBackend {
    fn init_command(&self, layout: &InstanceLayout) -> Command {
        let mut cmd = Command::new(&self.binaries.initdb);
        cmd.arg("-D")
            .arg(layout.data_dir())
            .arg("-U")
            .arg(&self.superuser)
            .args(["--auth=trust", "--encoding=UTF8", "--locale=C", "--no-sync"]);
        cmd
    }

    fn server_command(&self, layout: &InstanceLayout) -> Command {
        let mut cmd = Command::new(&self.binaries.postgres);
        cmd.arg("-D")
            .arg(layout.data_dir())
            .arg("-k")
            .arg(layout.socket_dir())
            .arg("-p")
            .arg(SOCKET_PORT.to_string())
            .args(["-c", "listen_addresses=", "-c", "fsync=off"]);
        cmd
    }

    fn ready_marker(&self) -> &str {
        READY_MARKER
    }
}

impl InstanceLifecycle for PostgresBackend {
    fn launch(&self) -> Result<InstanceHandle, EngineError> {
        let mut instance = EphemeralInstance::create(self, &self.options)?;
        if let Err(err) = instance.wait_ready(READY_MARKER, self.ready_timeout) {
            if let Err(teardown_err) = instance.teardown() {
                tracing::warn!(error = %teardown_err, "failed to tear down instance that never became ready");
            }
            return Err(err.into());
        }
        let endpoint = Endpoint {
            host: Some(instance.layout().socket_dir().to_string_lossy().into_owned()),
            port: SOCKET_PORT,
            user: Some(self.superuser.clone()),
            database: "postgres".to_string(),
            password: None,
        };
        Ok(InstanceHandle::new(endpoint, Some(instance)))
    }

    fn teardown(&self, handle: InstanceHandle, keep: bool) -> Result<Option<PathBuf>, EngineError> {
        let Some(instance) = handle.into_instance() else {
            return Ok(None);
        };
        if keep {
            let (layout, pid) = instance.detach();
            tracing::info!(
                instance = %layout.root.display(),
                pid = pid.unwrap_or_default(),
                "leaving instance running",
            );
            return Ok(Some(layout.root));
        }
        instance.teardown()?;
        Ok(None)
    }

    fn cleanup_orphans(&self) -> OrphanReport {
        cleanup_orphans(&self.options.base_dir, &self.options.prefix, &self.options.stop)
    }
}

impl PatchApplier for PostgresBackend {
    fn run_script(&self, target: &Endpoint, label: &str, script: &[u8]) -> Result<(), EngineError> {
        tracing::debug!(script = label, endpoint = %target, bytes = script.len(), "running script");
        let mut cmd = self.psql(target);
        cmd.args(["-f", "-"]);
        exec::run(cmd, Some(script)).map(|_| ())
    }
}

impl SchemaSnapshot for PostgresBackend {
    fn dump(&self, target: &Endpoint, scope: DumpScope) -> Result<String, EngineError> {
        let mut cmd = Command::new(&self.binaries.pg_dump);
        connection_args(&mut cmd, target);
        cmd.arg("-d").arg(&target.database);
        cmd.arg(match scope {
            DumpScope::Schema => "--schema-only",
            DumpScope::Data => "--data-only",
        });
        cmd.args(["--no-owner", "--no-privileges"])
            .arg(format!("--schema={}", quote_ident(&self.namespace)));
        if scope == DumpScope::Data {
            cmd.arg(format!("--exclude-table={}", self.qualified_ledger_table()));
        }
        exec::run(cmd, None)
    }

    fn has_schema(&self, target: &Endpoint) -> Result<bool, EngineError> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_class c \
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = {})",
            quote_literal(&self.namespace)
        );
        self.query_bool(target, &sql)
    }

    fn ensure_namespace(&self, target: &Endpoint) -> Result<(), EngineError> {
        self.execute(
            target,
            &format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.namespace)),
        )
    }
}

impl LedgerTable for PostgresBackend {
    fn ledger_table_exists(&self, target: &Endpoint) -> Result<bool, EngineError> {
        let sql = format!(
            "SELECT to_regclass({}) IS NOT NULL",
            quote_literal(&self.qualified_ledger_table())
        );
        self.query_bool(target, &sql)
    }

    fn create_ledger_table(&self, target: &Endpoint) -> Result<(), EngineError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             patch_name text PRIMARY KEY, \
             patch_hash text NOT NULL, \
             applied_at timestamptz NOT NULL DEFAULT now())",
            self.qualified_ledger_table()
        );
        self.execute(target, &sql)
    }

    fn read_ledger_table(&self, target: &Endpoint) -> Result<Ledger, EngineError> {
        let sql = format!(
            "SELECT patch_name, patch_hash, \
             to_char(applied_at AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS\"Z\"') \
             FROM {} ORDER BY patch_name",
            self.qualified_ledger_table()
        );
        let rows = self.query(target, &sql)?;
        let mut ledger = Ledger::new();
        for row in rows {
            let [name, hash, applied_at] = row.as_slice() else {
                return Err(EngineError::UnexpectedOutput {
                    command: sql,
                    output: row.join("\t"),
                });
            };
            ledger.insert(AppliedPatchRecord {
                name: PatchName::from(name.as_str()),
                hash: hash.clone(),
                applied_at: DateTime::parse_from_rfc3339(applied_at)
                    .ok()
                    .map(|t| t.with_timezone(&Utc)),
            });
        }
        Ok(ledger)
    }

    fn insert_ledger_record(
        &self,
        target: &Endpoint,
        record: &AppliedPatchRecord,
    ) -> Result<(), EngineError> {
        let applied_at = record
            .applied_at
            .map(|t| quote_literal(&t.to_rfc3339()))
            .unwrap_or_else(|| "now()".to_string());
        let sql = format!(
            "INSERT INTO {} (patch_name, patch_hash, applied_at) VALUES ({}, {}, {}) \
             ON CONFLICT (patch_name) DO NOTHING",
            self.qualified_ledger_table(),
            quote_literal(record.name.as_str()),
            quote_literal(&record.hash),
            applied_at
        );
        self.execute(target, &sql)
    }

    fn drop_ledger_table(&self, target: &Endpoint) -> Result<(), EngineError> {
        self.execute(
            target,
            &format!("DROP TABLE IF EXISTS {}", self.qualified_ledger_table()),
        )
    }
}
