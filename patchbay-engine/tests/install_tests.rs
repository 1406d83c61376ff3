mod support;

use patchbay_core::hash::content_hash;
use patchbay_core::ledger;
use patchbay_core::ConfigError;
use patchbay_engine::report::MismatchSource;
use patchbay_engine::{EngineError, Warning};
use support::{names, record, Project, ADD_BAR, CREATE_FOO};

fn distributed(patches: &[(&str, &str)]) -> Project {
    let project = Project::new();
    for (name, body) in patches {
        project.write_patch(name, body);
    }
    project.engine().distribute().unwrap();
    project
}

/// A target that has a schema and an empty ledger table.
fn seed_existing_target(project: &Project) {
    project.backend.seed_live("CREATE TABLE unrelated (id integer);");
    project.backend.seed_live_ledger(&[]);
}

#[test]
fn fresh_target_is_initialised_from_baseline() {
    let project = distributed(&[("0010_create_foo.sql", CREATE_FOO), ("0020_add_bar.sql", ADD_BAR)]);

    let report = project.engine().install().unwrap();

    assert!(report.initialized_from_baseline);
    assert!(report.applied.is_empty());
    let live = project.backend.live();
    assert_eq!(
        live.tables.get("foo"),
        Some(&vec!["id integer".to_string(), "bar text".to_string()])
    );
    let table = live.ledger.unwrap();
    assert_eq!(names(&table), ["0010_create_foo.sql", "0020_add_bar.sql"]);
}

#[test]
fn ledgers_agree_after_install() {
    let project = distributed(&[("0010_create_foo.sql", CREATE_FOO)]);
    project.engine().install().unwrap();
    project.write_patch("0020_add_bar.sql", ADD_BAR);
    project.engine().distribute().unwrap();

    let report = project.engine().install().unwrap();

    assert!(!report.initialized_from_baseline);
    assert_eq!(report.applied.len(), 1);
    let diff = ledger::diff(&project.file_ledger(), &project.backend.live().ledger.unwrap());
    assert!(diff.mismatched.is_empty());
    assert!(diff.only_in_left.is_empty());
}

#[test]
fn second_install_applies_nothing() {
    let project = distributed(&[("0010_create_foo.sql", CREATE_FOO)]);
    seed_existing_target(&project);

    let first = project.engine().install().unwrap();
    let second = project.engine().install().unwrap();

    assert_eq!(first.applied.len(), 1);
    assert!(second.applied.is_empty());
    assert!(second.warnings.is_empty());
}

#[test]
fn pending_patches_apply_in_order_and_are_recorded() {
    let project = distributed(&[("0010_create_foo.sql", CREATE_FOO), ("0020_add_bar.sql", ADD_BAR)]);
    project.backend.seed_live(CREATE_FOO);
    project.backend.seed_live_ledger(&[record(
        "0010_create_foo.sql",
        &content_hash(CREATE_FOO.as_bytes()),
    )]);

    let report = project.engine().install().unwrap();

    let applied: Vec<_> = report.applied.iter().map(|r| r.name.to_string()).collect();
    assert_eq!(applied, ["0020_add_bar.sql"]);
    let live = project.backend.live();
    assert_eq!(live.tables["foo"], ["id integer", "bar text"]);
    assert_eq!(names(&live.ledger.unwrap()), ["0010_create_foo.sql", "0020_add_bar.sql"]);
}

#[test]
fn pre_ledger_target_is_backfilled() {
    let project = distributed(&[("0010_create_foo.sql", CREATE_FOO), ("0020_add_bar.sql", ADD_BAR)]);
    project.backend.seed_live("CREATE TABLE foo (id integer, bar text);");

    let report = project.engine().install().unwrap();

    assert!(report.applied.is_empty());
    assert_eq!(report.warnings, vec![Warning::LedgerBackfilled { count: 2 }]);
    assert_eq!(
        names(&project.backend.live().ledger.unwrap()),
        ["0010_create_foo.sql", "0020_add_bar.sql"]
    );
}

#[test]
fn failure_aborts_and_keeps_earlier_patches() {
    let project = Project::new();
    project.write_baseline("");
    project.write_patch("0010_create_foo.sql", CREATE_FOO);
    project.write_patch("0020_alter_missing.sql", "ALTER TABLE missing ADD COLUMN x integer;\n");
    project.write_patch("0030_add_bar.sql", ADD_BAR);
    for name in ["0010_create_foo.sql", "0020_alter_missing.sql", "0030_add_bar.sql"] {
        project.record_distributed(name);
    }
    // A pre-existing target with an empty ledger table.
    seed_existing_target(&project);

    let err = project.engine().install().unwrap_err();

    assert!(
        matches!(&err, EngineError::ApplyFailure { patch, .. } if patch == "0020_alter_missing.sql"),
        "{err}"
    );
    let live = project.backend.live();
    assert_eq!(names(&live.ledger.unwrap()), ["0010_create_foo.sql"]);
    assert_eq!(live.tables["foo"], ["id integer"]);
}

#[test]
fn mismatched_hash_warns_and_skips() {
    let project = distributed(&[("0010_create_foo.sql", CREATE_FOO)]);
    project.backend.seed_live(CREATE_FOO);
    project.backend.seed_live_ledger(&[record("0010_create_foo.sql", "deadbeef")]);

    let report = project.engine().install().unwrap();

    assert!(report.applied.is_empty());
    match report.warnings.as_slice() {
        [Warning::LedgerMismatch {
            name,
            other_hash,
            source: MismatchSource::LedgerTable,
            ..
        }] => {
            assert_eq!(name.as_str(), "0010_create_foo.sql");
            assert_eq!(other_hash, "deadbeef");
        }
        other => panic!("unexpected warnings: {other:?}"),
    }
}

#[test]
fn target_ahead_of_ledger_file_is_reported() {
    let project = distributed(&[("0010_create_foo.sql", CREATE_FOO)]);
    project.backend.seed_live(CREATE_FOO);
    project.backend.seed_live_ledger(&[
        record("0010_create_foo.sql", &content_hash(CREATE_FOO.as_bytes())),
        record("0099_hotfix.sql", "abc"),
    ]);

    let report = project.engine().install().unwrap();

    assert_eq!(
        report.warnings,
        vec![Warning::UnknownAppliedPatch {
            name: "0099_hotfix.sql".into()
        }]
    );
}

#[test]
fn missing_patch_file_is_fatal_before_applying() {
    let project = distributed(&[("0010_create_foo.sql", CREATE_FOO), ("0020_add_bar.sql", ADD_BAR)]);
    project.backend.seed_live("CREATE TABLE unrelated (id integer);");
    project.backend.seed_live_ledger(&[]);
    std::fs::remove_file(project.config.patch_dir.join("0020_add_bar.sql")).unwrap();

    let err = project.engine().install().unwrap_err();

    assert!(matches!(err, EngineError::PatchFileMissing { .. }), "{err}");
    assert!(!project.backend.live().tables.contains_key("foo"));
}

#[test]
fn missing_target_database_is_a_config_error() {
    let mut project = Project::new();
    project.config.target.database = None;

    let err = project.engine().install().unwrap_err();
    assert!(matches!(
        err,
        EngineError::Config(ConfigError::Missing { field: "target.database" })
    ));
}
