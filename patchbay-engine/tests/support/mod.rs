//! In-memory backend and fixtures for workflow tests.
//!
//! Databases are maps of tables to column definitions, driven by a tiny
//! interpreter that understands just enough DDL for the tests:
//! `CREATE TABLE`, `ALTER TABLE .. ADD COLUMN`, `DROP TABLE` and
//! `INSERT INTO`. Anything else is a "syntax error", which is how tests
//! make a patch fail.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tempfile::TempDir;

use patchbay_core::hash::content_hash;
use patchbay_core::{ledger, AppliedPatchRecord, EngineConfig, Ledger, PatchName};
use patchbay_engine::backend::{
    InstanceLifecycle, LedgerTable, PatchApplier, SchemaSnapshot,
};
use patchbay_engine::{DumpScope, Endpoint, EngineError, InstanceHandle, ReconciliationEngine};
use patchbay_instance::OrphanReport;

pub const LIVE_DB: &str = "live";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Database {
    /// Table name → column definitions, in declaration order.
    pub tables: BTreeMap<String, Vec<String>>,
    /// `None` until the ledger table exists.
    pub ledger: Option<Ledger>,
    /// Data statements, in execution order.
    pub rows: Vec<String>,
    /// Labels of every script run against this database.
    pub scripts: Vec<String>,
}

#[derive(Debug, Default)]
pub struct World {
    pub databases: BTreeMap<String, Database>,
    pub launched: u32,
    pub running: Vec<String>,
    pub orphan_scans: u32,
}

/// Backend whose state is shared between clones, so a test can keep a handle
/// while the engine owns another.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    world: Rc<RefCell<World>>,
    ledger_table: String,
}

impl MemoryBackend {
    pub fn new(ledger_table: &str) -> Self {
        Self {
            world: Rc::default(),
            ledger_table: ledger_table.to_string(),
        }
    }

    pub fn database(&self, name: &str) -> Option<Database> {
        self.world.borrow().databases.get(name).cloned()
    }

    pub fn live(&self) -> Database {
        self.database(LIVE_DB).unwrap_or_default()
    }

    pub fn columns(&self, db: &str, table: &str) -> Option<Vec<String>> {
        self.database(db)?.tables.get(table).cloned()
    }

    pub fn launched(&self) -> u32 {
        self.world.borrow().launched
    }

    pub fn running(&self) -> Vec<String> {
        self.world.borrow().running.clone()
    }

    pub fn orphan_scans(&self) -> u32 {
        self.world.borrow().orphan_scans
    }

    /// Run `sql` against the live database outside any workflow.
    pub fn seed_live(&self, sql: &str) {
        let mut world = self.world.borrow_mut();
        let db = world.databases.entry(LIVE_DB.to_string()).or_default();
        execute(db, &self.ledger_table, "seed", sql).expect("seed script");
    }

    /// Create the live ledger table holding `records`.
    pub fn seed_live_ledger(&self, records: &[AppliedPatchRecord]) {
        let mut world = self.world.borrow_mut();
        let db = world.databases.entry(LIVE_DB.to_string()).or_default();
        let table = db.ledger.get_or_insert_with(Ledger::new);
        for record in records {
            table.insert(record.clone());
        }
    }

    fn with_db<T>(
        &self,
        target: &Endpoint,
        f: impl FnOnce(&mut Database) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut world = self.world.borrow_mut();
        let db = world.databases.entry(target.database.clone()).or_default();
        f(db)
    }
}

fn failure(stderr: String) -> EngineError {
    EngineError::CommandFailed {
        command: "memory-sql".to_string(),
        status: "exit status: 3".to_string(),
        stderr,
    }
}

fn strip_qualifier(name: &str) -> String {
    name.rsplit('.').next().unwrap_or(name).trim_matches('"').to_string()
}

fn execute(db: &mut Database, ledger_table: &str, label: &str, sql: &str) -> Result<(), EngineError> {
    db.scripts.push(label.to_string());
    let statements = sql.split(';').map(|stmt| {
        stmt.lines()
            .filter(|l| !l.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n")
    });
    for stmt in statements {
        let stmt = stmt.trim();
        if stmt.is_empty() {
            continue;
        }
        run_statement(db, ledger_table, stmt)?;
    }
    Ok(())
}

fn run_statement(db: &mut Database, ledger_table: &str, stmt: &str) -> Result<(), EngineError> {
    let tokens: Vec<&str> = stmt.split_whitespace().collect();
    let upper: Vec<String> = tokens.iter().take(6).map(|t| t.to_ascii_uppercase()).collect();
    let kw: Vec<&str> = upper.iter().map(String::as_str).collect();

    match kw.as_slice() {
        ["CREATE", "TABLE", ..] => {
            let (if_not_exists, name_at) = if kw.get(2..5) == Some(&["IF", "NOT", "EXISTS"][..]) {
                (true, 5)
            } else {
                (false, 2)
            };
            let raw_name = tokens
                .get(name_at)
                .copied()
                .ok_or_else(|| failure("ERROR:  syntax error at end of input".into()))?;
            let name = strip_qualifier(raw_name.split('(').next().unwrap_or(raw_name));
            let columns = parse_columns(stmt);
            if name == ledger_table {
                if db.ledger.is_some() && !if_not_exists {
                    return Err(failure(format!("ERROR:  relation \"{name}\" already exists")));
                }
                db.ledger.get_or_insert_with(Ledger::new);
                return Ok(());
            }
            if db.tables.contains_key(&name) {
                if if_not_exists {
                    return Ok(());
                }
                return Err(failure(format!("ERROR:  relation \"{name}\" already exists")));
            }
            db.tables.insert(name, columns);
            Ok(())
        }
        ["ALTER", "TABLE", _, "ADD", "COLUMN", ..] => {
            let name = strip_qualifier(tokens[2]);
            let column = tokens[5..].join(" ");
            let Some(columns) = db.tables.get_mut(&name) else {
                return Err(failure(format!("ERROR:  relation \"{name}\" does not exist")));
            };
            let col_name = column.split_whitespace().next().unwrap_or_default();
            if columns.iter().any(|c| c.split_whitespace().next() == Some(col_name)) {
                return Err(failure(format!(
                    "ERROR:  column \"{col_name}\" of relation \"{name}\" already exists"
                )));
            }
            columns.push(column);
            Ok(())
        }
        ["ALTER", ..] if stmt.contains(" OWNER TO ") => Ok(()),
        ["SET", ..] | ["SELECT", ..] | ["GRANT", ..] => Ok(()),
        ["DROP", "TABLE", ..] => {
            let name = strip_qualifier(tokens.last().copied().unwrap_or_default());
            if name == ledger_table {
                db.ledger = None;
            } else {
                db.tables.remove(&name);
            }
            Ok(())
        }
        ["INSERT", "INTO", ..] => {
            let name = strip_qualifier(tokens[2].split('(').next().unwrap_or(tokens[2]));
            if !db.tables.contains_key(&name) {
                return Err(failure(format!("ERROR:  relation \"{name}\" does not exist")));
            }
            db.rows.push(format!("{stmt};"));
            Ok(())
        }
        _ => Err(failure(format!(
            "ERROR:  syntax error at or near \"{}\"",
            tokens.first().copied().unwrap_or_default()
        ))),
    }
}

fn parse_columns(stmt: &str) -> Vec<String> {
    let (Some(open), Some(close)) = (stmt.find('('), stmt.rfind(')')) else {
        return Vec::new();
    };
    stmt[open + 1..close]
        .split(',')
        .map(|c| c.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|c| !c.is_empty())
        .collect()
}

/// Render a database the way `pg_dump` would, noise included.
fn render_schema(db: &Database, ledger_table: &str) -> String {
    let mut tables: Vec<(String, Vec<String>)> = db
        .tables
        .iter()
        .map(|(name, cols)| (name.clone(), cols.clone()))
        .collect();
    if db.ledger.is_some() {
        tables.push((
            ledger_table.to_string(),
            vec![
                "patch_name text NOT NULL".to_string(),
                "patch_hash text NOT NULL".to_string(),
                "applied_at timestamptz NOT NULL".to_string(),
            ],
        ));
        tables.sort();
    }

    let mut out = String::from(
        "--\n-- in-memory dump\n--\n\nSET statement_timeout = 0;\nSELECT pg_catalog.set_config('search_path', '', false);\n\n",
    );
    for (name, cols) in tables {
        out.push_str(&format!("--\n-- Name: {name}; Type: TABLE\n--\n\n"));
        out.push_str(&format!("CREATE TABLE public.{name} (\n"));
        let body: Vec<String> = cols.iter().map(|c| format!("    {c}")).collect();
        out.push_str(&body.join(",\n"));
        if !body.is_empty() {
            out.push('\n');
        }
        out.push_str(");\n\n\n");
        out.push_str(&format!("ALTER TABLE public.{name} OWNER TO tester;\n\n"));
    }
    out
}

impl InstanceLifecycle for MemoryBackend {
    fn launch(&self) -> Result<InstanceHandle, EngineError> {
        let mut world = self.world.borrow_mut();
        world.launched += 1;
        let name = format!("instance-{}", world.launched);
        world.databases.insert(name.clone(), Database::default());
        world.running.push(name.clone());
        Ok(InstanceHandle::new(
            Endpoint {
                host: Some("memory".to_string()),
                port: 0,
                user: None,
                database: name,
                password: None,
            },
            None,
        ))
    }

    fn teardown(&self, handle: InstanceHandle, keep: bool) -> Result<Option<PathBuf>, EngineError> {
        let name = handle.endpoint.database;
        if keep {
            return Ok(Some(PathBuf::from("memory").join(name)));
        }
        let mut world = self.world.borrow_mut();
        world.running.retain(|n| n != &name);
        world.databases.remove(&name);
        Ok(None)
    }

    fn cleanup_orphans(&self) -> OrphanReport {
        self.world.borrow_mut().orphan_scans += 1;
        OrphanReport::default()
    }
}

impl PatchApplier for MemoryBackend {
    fn run_script(&self, target: &Endpoint, label: &str, script: &[u8]) -> Result<(), EngineError> {
        let sql = String::from_utf8_lossy(script).into_owned();
        let ledger_table = self.ledger_table.clone();
        self.with_db(target, |db| execute(db, &ledger_table, label, &sql))
    }
}

impl SchemaSnapshot for MemoryBackend {
    fn dump(&self, target: &Endpoint, scope: DumpScope) -> Result<String, EngineError> {
        let ledger_table = self.ledger_table.clone();
        self.with_db(target, |db| {
            Ok(match scope {
                DumpScope::Schema => render_schema(db, &ledger_table),
                DumpScope::Data => db.rows.iter().map(|r| format!("{r}\n")).collect(),
            })
        })
    }

    fn has_schema(&self, target: &Endpoint) -> Result<bool, EngineError> {
        self.with_db(target, |db| Ok(!db.tables.is_empty() || db.ledger.is_some()))
    }

    fn ensure_namespace(&self, target: &Endpoint) -> Result<(), EngineError> {
        self.with_db(target, |_| Ok(()))
    }
}

impl LedgerTable for MemoryBackend {
    fn ledger_table_exists(&self, target: &Endpoint) -> Result<bool, EngineError> {
        self.with_db(target, |db| Ok(db.ledger.is_some()))
    }

    fn create_ledger_table(&self, target: &Endpoint) -> Result<(), EngineError> {
        self.with_db(target, |db| {
            db.ledger.get_or_insert_with(Ledger::new);
            Ok(())
        })
    }

    fn read_ledger_table(&self, target: &Endpoint) -> Result<Ledger, EngineError> {
        self.with_db(target, |db| {
            db.ledger
                .clone()
                .ok_or_else(|| failure("ERROR:  relation \"patch_ledger\" does not exist".into()))
        })
    }

    fn insert_ledger_record(
        &self,
        target: &Endpoint,
        record: &AppliedPatchRecord,
    ) -> Result<(), EngineError> {
        self.with_db(target, |db| {
            let table = db
                .ledger
                .as_mut()
                .ok_or_else(|| failure("ERROR:  relation \"patch_ledger\" does not exist".into()))?;
            if !table.contains(&record.name) {
                table.insert(record.clone());
            }
            Ok(())
        })
    }

    fn drop_ledger_table(&self, target: &Endpoint) -> Result<(), EngineError> {
        self.with_db(target, |db| {
            db.ledger = None;
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Project fixture
// ---------------------------------------------------------------------------

/// A project directory with `patches/`, `baseline/` and a config pointing
/// at them, plus a shared in-memory backend.
pub struct Project {
    pub dir: TempDir,
    pub config: EngineConfig,
    pub backend: MemoryBackend,
}

impl Project {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let mut config = EngineConfig::rooted_at(dir.path());
        config.target.database = Some(LIVE_DB.to_string());
        config.instance.base_dir = Some(dir.path().join("instances"));
        fs::create_dir_all(&config.patch_dir).expect("patch dir");
        let backend = MemoryBackend::new(&config.ledger_table);
        Self {
            dir,
            config,
            backend,
        }
    }

    pub fn engine(&self) -> ReconciliationEngine<MemoryBackend> {
        ReconciliationEngine::new(self.config.clone(), self.backend.clone())
    }

    pub fn write_patch(&self, name: &str, body: &str) -> PathBuf {
        let path = self.config.patch_dir.join(name);
        fs::write(&path, body).expect("write patch");
        path
    }

    /// Record `name` in the ledger file with the hash of its current file.
    pub fn record_distributed(&self, name: &str) {
        let body = fs::read(self.config.patch_dir.join(name)).expect("patch exists");
        ledger::append_file(&self.config.ledger_file, &record(name, &content_hash(&body)))
            .expect("append ledger");
    }

    pub fn write_baseline(&self, text: &str) {
        let path = &self.config.baseline.schema;
        fs::create_dir_all(path.parent().expect("baseline parent")).expect("baseline dir");
        fs::write(path, text).expect("write baseline");
    }

    pub fn baseline(&self) -> Option<String> {
        fs::read_to_string(&self.config.baseline.schema).ok()
    }

    pub fn file_ledger(&self) -> Ledger {
        ledger::read_file(&self.config.ledger_file).expect("read ledger file")
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

pub fn record(name: &str, hash: &str) -> AppliedPatchRecord {
    AppliedPatchRecord {
        name: PatchName::from(name),
        hash: hash.to_string(),
        applied_at: None,
    }
}

pub fn names(ledger: &Ledger) -> Vec<String> {
    ledger.names().map(|n| n.to_string()).collect()
}

pub const CREATE_FOO: &str = "CREATE TABLE foo (id integer);\n";
pub const ADD_BAR: &str = "ALTER TABLE foo ADD COLUMN bar text;\n";
