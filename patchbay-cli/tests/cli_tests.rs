use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn patchbay_cmd(project: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patchbay"));
    cmd.current_dir(project)
        .env("NO_COLOR", "1")
        .env("RUST_LOG", "warn");
    cmd
}

fn project_with(patches: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().expect("project dir");
    let patch_dir = dir.path().join("patches");
    fs::create_dir_all(&patch_dir).expect("patch dir");
    for (name, body) in patches {
        fs::write(patch_dir.join(name), body).expect("write patch");
    }
    dir
}

#[test]
fn help_lists_every_workflow() {
    let assert = Command::new(assert_cmd::cargo::cargo_bin!("patchbay"))
        .arg("--help")
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    for command in ["dist", "test", "fake-install", "install", "status", "cleanup"] {
        assert!(stdout.contains(command), "help is missing '{command}':\n{stdout}");
    }
}

#[test]
fn status_lists_pending_patches() {
    let project = project_with(&[
        ("0010_create_foo.sql", "CREATE TABLE foo (id integer);\n"),
        ("0020_add_bar.sql", "ALTER TABLE foo ADD COLUMN bar text;\n"),
    ]);

    patchbay_cmd(project.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("0010_create_foo.sql"))
        .stdout(contains("0020_add_bar.sql"))
        .stdout(contains("PENDING"))
        .stdout(contains("2 patches | 2 pending"));
}

#[test]
fn status_json_is_machine_readable() {
    let project = project_with(&[("0010_create_foo.sql", "CREATE TABLE foo (id integer);\n")]);
    fs::write(
        project.path().join("patches/ledger.tsv"),
        "0010_create_foo.sql\tdeadbeef\n",
    )
    .expect("seed ledger");

    let assert = patchbay_cmd(project.path())
        .args(["status", "--json"])
        .assert()
        .success();
    let report: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("status JSON");

    assert_eq!(report["patches"][0]["name"], "0010_create_foo.sql");
    assert_eq!(report["patches"][0]["state"], "drift");
    assert_eq!(report["warnings"][0]["kind"], "ledger_mismatch");
}

#[test]
fn invalid_patch_name_fails_with_message() {
    let project = project_with(&[
        ("0010_create_foo.sql", "CREATE TABLE foo (id integer);\n"),
        ("add_bar.sql", "ALTER TABLE foo ADD COLUMN bar text;\n"),
    ]);

    patchbay_cmd(project.path())
        .args(["--fake", "dist"])
        .assert()
        .failure()
        .stderr(contains("invalid patch name 'add_bar.sql'"));
}

#[test]
fn fake_dist_reports_and_writes_nothing() {
    let project = project_with(&[("0010_create_foo.sql", "CREATE TABLE foo (id integer);\n")]);

    patchbay_cmd(project.path())
        .args(["--fake", "dist"])
        .assert()
        .success()
        .stdout(contains("[fake]"))
        .stdout(contains("would write"));

    assert!(!project.path().join("baseline").exists());
    assert!(!project.path().join("patches/ledger.tsv").exists());
}

#[test]
fn config_file_paths_are_relative_to_the_file() {
    let project = TempDir::new().expect("project dir");
    let nested = project.path().join("db");
    fs::create_dir_all(nested.join("migrations")).expect("patch dir");
    fs::write(
        nested.join("migrations/0001_init.sql"),
        "CREATE TABLE t (id integer);\n",
    )
    .expect("write patch");
    fs::write(nested.join("patchbay.yaml"), "patch_dir: migrations\n").expect("write config");

    patchbay_cmd(project.path())
        .args(["--config", "db/patchbay.yaml", "status"])
        .assert()
        .success()
        .stdout(contains("0001_init.sql"));
}

#[test]
fn config_in_working_directory_is_picked_up() {
    let project = TempDir::new().expect("project dir");
    fs::create_dir_all(project.path().join("sql")).expect("patch dir");
    fs::write(
        project.path().join("sql/0001_init.sql"),
        "CREATE TABLE t (id integer);\n",
    )
    .expect("write patch");
    fs::write(project.path().join("patchbay.yaml"), "patch_dir: sql\n").expect("write config");

    patchbay_cmd(project.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("0001_init.sql"));
}

#[test]
fn missing_explicit_config_is_an_error() {
    let project = TempDir::new().expect("project dir");

    patchbay_cmd(project.path())
        .args(["--config", "nope.yaml", "status"])
        .assert()
        .failure()
        .stderr(contains("failed to load config nope.yaml"));
}

#[test]
fn install_requires_a_target_database() {
    let project = project_with(&[]);

    patchbay_cmd(project.path())
        .args(["--fake", "install"])
        .assert()
        .failure()
        .stderr(contains("target.database"))
        .stdout(predicate::str::is_empty());
}
