mod common;

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;

use common::{SyncWorkspace, customers_workspace};

fn sheet_sync() -> Command {
    let mut cmd = Command::cargo_bin("sheet-sync").expect("binary exists");
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn sync_prints_text_report_and_commits() {
    let (workspace, config) = customers_workspace();
    sheet_sync()
        .args(["sync", "--config", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("committed"))
        .stdout(contains("statements_executed     1"))
        .stdout(contains("name"));
    assert_eq!(workspace.names()[1], (2, "Bo".to_string()));
}

#[test]
fn sync_writes_json_report_file() {
    let (workspace, config) = customers_workspace();
    let report_path = workspace.path().join("report.json");
    sheet_sync()
        .args([
            "sync",
            "--config",
            config.to_str().unwrap(),
            "--dry-run",
            "--report-format",
            "json",
            "--report",
            report_path.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("\"dry_run\""));

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).expect("read report"))
            .expect("parse report");
    assert_eq!(report["outcome"]["status"], "dry_run");
    assert_eq!(report["statements_planned"], 1);
    assert_eq!(report["unmatched_spreadsheet_keys"][0], "3");
    assert_eq!(report["unmatched_database_keys"][0], "4");
    assert_eq!(report["intents"][0]["key"], "2");
    assert_eq!(workspace.names()[1], (2, "Bob".to_string()));
}

#[test]
fn plan_prints_parameterized_statements() {
    let (workspace, config) = customers_workspace();
    sheet_sync()
        .args(["plan", "--config", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains(
            r#"UPDATE "customers" SET "name" = ?1 WHERE "id" = ?2;"#,
        ))
        .stdout(contains("?1 = Bo, ?2 = 2"))
        .stdout(contains("-- plan digest"));
    assert_eq!(workspace.names()[1], (2, "Bob".to_string()));
}

#[test]
fn table_override_is_validated() {
    let (_workspace, config) = customers_workspace();
    sheet_sync()
        .args([
            "plan",
            "--config",
            config.to_str().unwrap(),
            "--table",
            "customers\"; DROP TABLE customers; --",
        ])
        .assert()
        .failure()
        .stderr(contains("error:"))
        .stderr(contains("invalid identifier"));
}

#[test]
fn preview_shows_normalized_rows() {
    let (_workspace, config) = customers_workspace();
    sheet_sync()
        .args(["preview", "--config", config.to_str().unwrap(), "--rows", "2"])
        .assert()
        .success()
        .stdout(contains("id"))
        .stdout(contains("Ann"))
        .stdout(contains("10.0"))
        .stdout(contains("Cy").not());
}

#[test]
fn aborted_sync_still_prints_report_and_exits_nonzero() {
    let (workspace, config) = customers_workspace();
    workspace.write(
        "customers.csv",
        "id,name,amount,joined\n1,Ann,10,\n1,Annie,10,\n",
    );
    sheet_sync()
        .args(["sync", "--config", config.to_str().unwrap()])
        .assert()
        .failure()
        .stdout(contains("aborted (duplicate_key)"))
        .stderr(contains("error: Sync aborted"));
}

#[test]
fn aborted_plan_prints_report() {
    let (workspace, config) = customers_workspace();
    workspace.write(
        "customers.csv",
        "id,name,amount,joined\n1,Ann,10,\n1,Annie,10,\n",
    );
    sheet_sync()
        .args(["plan", "--config", config.to_str().unwrap()])
        .assert()
        .failure()
        .stdout(contains("aborted (duplicate_key)"))
        .stdout(contains("UPDATE").not())
        .stderr(contains("error: Planning aborted"));
}

#[test]
fn missing_config_fails_cleanly() {
    let workspace = SyncWorkspace::new();
    let config = workspace.path().join("absent.yml");
    sheet_sync()
        .args(["sync", "--config", config.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("Loading config"));
}
