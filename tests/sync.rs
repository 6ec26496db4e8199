mod common;

use common::{CUSTOMERS_QUERY, CUSTOMERS_SCHEMA, SyncWorkspace, customers_workspace};
use sheet_sync::{
    config::SyncConfig,
    error::SyncError,
    key::Key,
    report::{Outcome, RunStage},
    row::Provenance,
    sync::{Pipeline, RunMode},
};

fn pipeline(config: &std::path::Path) -> Pipeline {
    Pipeline::new(SyncConfig::load(config).expect("load config")).expect("build pipeline")
}

#[test]
fn sync_updates_changed_rows_and_reports_unmatched_keys() {
    let (workspace, config) = customers_workspace();
    let run = pipeline(&config).run(RunMode::Execute);

    assert!(run.error.is_none(), "unexpected error: {:?}", run.error);
    let report = run.report;
    assert_eq!(report.outcome, Outcome::Committed);
    assert_eq!(report.stage, RunStage::Executed);
    assert_eq!(report.spreadsheet_rows, 3);
    assert_eq!(report.database_rows, 3);
    assert_eq!(report.intents.len(), 1);
    assert_eq!(report.intents[0].key, Key::from(2));
    assert_eq!(report.intents[0].changed, vec!["name"]);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.unmatched_spreadsheet_keys, vec![Key::from(3)]);
    assert_eq!(report.unmatched_database_keys, vec![Key::from(4)]);
    assert_eq!(report.statements_executed, 1);
    assert!(report.plan_digest.is_some());

    assert_eq!(
        workspace.names(),
        vec![(1, "Ann".to_string()), (2, "Bo".to_string()), (4, "Dee".to_string())]
    );
}

#[test]
fn second_run_is_a_no_op() {
    let (_workspace, config) = customers_workspace();
    let first = pipeline(&config).run(RunMode::Execute);
    assert_eq!(first.report.outcome, Outcome::Committed);

    let second = pipeline(&config).run(RunMode::Execute);
    assert!(second.error.is_none());
    assert_eq!(second.report.outcome, Outcome::NothingToDo);
    assert!(second.statements.is_empty());
    assert_eq!(second.report.unchanged, 2);
}

#[test]
fn dry_run_leaves_database_untouched() {
    let (workspace, config) = customers_workspace();
    let run = pipeline(&config).run(RunMode::DryRun);
    assert_eq!(run.report.outcome, Outcome::DryRun);
    assert_eq!(run.statements.len(), 1);
    assert_eq!(run.report.statements_executed, 0);
    assert_eq!(workspace.names()[1], (2, "Bob".to_string()));
}

#[test]
fn plan_digest_is_stable_across_dry_runs() {
    let (_workspace, config) = customers_workspace();
    let a = pipeline(&config).run(RunMode::DryRun);
    let b = pipeline(&config).run(RunMode::DryRun);
    assert_eq!(a.report.plan_digest, b.report.plan_digest);
}

#[test]
fn duplicate_database_key_aborts_before_any_write() {
    let workspace = SyncWorkspace::new();
    workspace.create_database(
        "CREATE TABLE customers (id INTEGER, name TEXT NOT NULL, amount REAL, joined DATE);
         INSERT INTO customers VALUES (1, 'Ann', 10.0, NULL);
         INSERT INTO customers VALUES (1, 'Ann again', 11.0, NULL);",
    );
    workspace.write_secret();
    workspace.write("query.sql", CUSTOMERS_QUERY);
    workspace.write("customers.csv", "id,name,amount,joined\n1,Zed,10,\n");
    let config = workspace.write_config("customers.csv", "");

    let run = pipeline(&config).run(RunMode::Execute);
    match &run.error {
        Some(SyncError::DuplicateKey { side, key, .. }) => {
            assert_eq!(*side, Provenance::Database);
            assert_eq!(*key, Key::from(1));
        }
        other => panic!("expected duplicate key error, got {other:?}"),
    }
    assert!(run.report.is_aborted());
    assert!(run.report.intents.is_empty());
    assert_eq!(run.report.stage, RunStage::Normalized);
    let names = workspace.names();
    assert_eq!(names.len(), 2);
    assert!(names.iter().all(|(_, name)| name != "Zed"));
}

#[test]
fn failing_statement_rolls_back_the_batch() {
    let (workspace, config) = customers_workspace();
    workspace
        .open_database()
        .execute_batch(
            "CREATE TRIGGER reject_zed BEFORE UPDATE ON customers
             WHEN NEW.name = 'Zed'
             BEGIN SELECT RAISE(ABORT, 'Zed is not allowed'); END;",
        )
        .expect("create trigger");
    workspace.write(
        "customers.csv",
        "id,name,amount,joined\n1,Annie,10,2024-01-05\n2,Zed,5,\n",
    );

    let run = pipeline(&config).run(RunMode::Execute);
    match &run.error {
        Some(SyncError::StatementExecution { index, key, .. }) => {
            assert_eq!(*index, 2);
            assert_eq!(*key, Key::from(2));
        }
        other => panic!("expected statement failure, got {other:?}"),
    }
    assert_eq!(run.report.failing_key, Some(Key::from(2)));
    assert_eq!(run.report.statements_rolled_back, 2);
    assert_eq!(run.report.statements_executed, 0);
    assert_eq!(run.report.stage, RunStage::Planned);
    assert_eq!(workspace.names()[0], (1, "Ann".to_string()));
    assert_eq!(workspace.names()[1], (2, "Bob".to_string()));
}

#[test]
fn bad_cells_are_skipped_and_reported() {
    let (workspace, config) = customers_workspace();
    workspace.write(
        "customers.csv",
        "id,name,amount,joined\n1,Ann,ten,2024-01-05\n2,Bo,5,not a date\n,Nobody,1,\n4,Dee,7.5,2023-12-31\n",
    );
    let run = pipeline(&config).run(RunMode::DryRun);
    assert!(run.error.is_none());
    let failures = &run.report.normalization_failures;
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].position, 2);
    assert_eq!(failures[1].position, 3);
    assert_eq!(run.report.unkeyable_rows.len(), 1);
    assert_eq!(run.report.unkeyable_rows[0].position, 4);
    assert_eq!(run.report.unchanged, 1);
    assert_eq!(run.report.outcome, Outcome::NothingToDo);
}

#[test]
fn date_changes_are_written_as_iso_text() {
    let (workspace, config) = customers_workspace();
    workspace.write(
        "customers.csv",
        "id,name,amount,joined\n1,Ann,10,2024-02-01\n",
    );
    let run = pipeline(&config).run(RunMode::Execute);
    assert!(run.error.is_none());
    assert_eq!(run.report.intents[0].changed, vec!["joined"]);
    let joined: String = workspace
        .open_database()
        .query_row("SELECT joined FROM customers WHERE id = 1", [], |row| row.get(0))
        .unwrap();
    assert_eq!(joined, "2024-02-01");
}

#[test]
fn text_keys_keep_leading_zeros() {
    let workspace = SyncWorkspace::new();
    workspace.create_database(
        "CREATE TABLE customers (id TEXT PRIMARY KEY, name TEXT NOT NULL);
         INSERT INTO customers VALUES ('007', 'Bond');
         INSERT INTO customers VALUES ('7', 'Seven');",
    );
    workspace.write_secret();
    workspace.write("query.sql", "SELECT id, name FROM customers");
    workspace.write("customers.csv", "id,name\n007,James\n");
    let config = workspace.write_config(
        "customers.csv",
        "columns:\n  - name: id\n    datatype: string\n",
    );
    let config_text = std::fs::read_to_string(&config).unwrap();
    std::fs::write(&config, config_text.replace("[name, amount, joined]", "[name]")).unwrap();

    let run = pipeline(&config).run(RunMode::Execute);
    assert!(run.error.is_none(), "unexpected error: {:?}", run.error);
    assert_eq!(run.report.intents.len(), 1);
    assert_eq!(run.report.intents[0].key, Key::from("007"));
    assert_eq!(run.report.unmatched_database_keys, vec![Key::from("7")]);
    let name: String = workspace
        .open_database()
        .query_row("SELECT name FROM customers WHERE id = '007'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(name, "James");
}

#[test]
fn missing_secret_aborts_with_credential_error() {
    let workspace = SyncWorkspace::new();
    workspace.create_database(CUSTOMERS_SCHEMA);
    workspace.write("query.sql", CUSTOMERS_QUERY);
    workspace.write("customers.csv", "id,name\n1,Ann\n");
    let config = workspace.write_config("customers.csv", "");

    let run = pipeline(&config).run(RunMode::Execute);
    assert!(matches!(run.error, Some(SyncError::Credential(_))));
    assert_eq!(run.report.stage, RunStage::Started);
    match &run.report.outcome {
        Outcome::Aborted { kind, .. } => assert_eq!(kind, "credential"),
        other => panic!("expected aborted outcome, got {other:?}"),
    }
}

#[test]
fn query_parameters_filter_the_database_side() {
    let (workspace, _) = customers_workspace();
    workspace.write(
        "query.sql",
        "SELECT id, name, amount, joined FROM customers WHERE id <= :max_id ORDER BY id",
    );
    let config = workspace.write_config("customers.csv", "  params:\n    max_id: 2\n");
    let run = pipeline(&config).run(RunMode::DryRun);
    assert!(run.error.is_none(), "unexpected error: {:?}", run.error);
    assert_eq!(run.report.database_rows, 2);
    assert!(run.report.unmatched_database_keys.is_empty());
}

#[test]
fn snake_case_headers_update_declared_columns() {
    let workspace = SyncWorkspace::new();
    workspace.create_database(
        "CREATE TABLE customers (CustomerId INTEGER PRIMARY KEY, FullName TEXT NOT NULL);
         INSERT INTO customers VALUES (1, 'Ann');
         INSERT INTO customers VALUES (2, 'Bob');",
    );
    workspace.write_secret();
    workspace.write(
        "query.sql",
        "SELECT CustomerId, FullName FROM customers ORDER BY CustomerId",
    );
    workspace.write("customers.csv", "Customer Id,Full Name\n1,Ann\n2,Bo\n");
    let config = workspace.write_keyed_config(
        "customers.csv",
        "[customer_id]",
        "[full_name]",
        "header_case: snake\n",
    );

    let run = pipeline(&config).run(RunMode::Execute);
    assert!(run.error.is_none(), "unexpected error: {:?}", run.error);
    assert_eq!(run.report.outcome, Outcome::Committed);
    assert_eq!(run.report.intents[0].changed, vec!["full_name"]);
    assert_eq!(
        run.statements[0].sql,
        r#"UPDATE "customers" SET "FullName" = ?1 WHERE "CustomerId" = ?2"#
    );
    assert_eq!(
        workspace.strings("SELECT FullName FROM customers ORDER BY CustomerId"),
        vec!["Ann", "Bo"]
    );
}

#[test]
fn preserved_headers_match_mixed_case_columns() {
    let workspace = SyncWorkspace::new();
    workspace.create_database(
        "CREATE TABLE customers (CustomerId INTEGER PRIMARY KEY, FullName TEXT NOT NULL);
         INSERT INTO customers VALUES (1, 'Ann');",
    );
    workspace.write_secret();
    workspace.write("query.sql", "SELECT CustomerId, FullName FROM customers");
    workspace.write("customers.csv", "CustomerId,FullName\n1,Annie\n");
    let config = workspace.write_keyed_config(
        "customers.csv",
        "[CustomerId]",
        "[FullName]",
        "header_case: preserve\n",
    );

    let run = pipeline(&config).run(RunMode::Execute);
    assert!(run.error.is_none(), "unexpected error: {:?}", run.error);
    assert_eq!(run.report.intents[0].changed, vec!["FullName"]);
    assert_eq!(run.report.statements_executed, 1);
    assert_eq!(workspace.strings("SELECT FullName FROM customers"), vec!["Annie"]);
}

#[test]
fn datetime_keys_match_their_stored_text() {
    let workspace = SyncWorkspace::new();
    workspace.create_database(
        "CREATE TABLE customers (ts DATETIME PRIMARY KEY, name TEXT NOT NULL);
         INSERT INTO customers VALUES ('2024-01-05T10:00:00', 'Ann');",
    );
    workspace.write_secret();
    workspace.write("query.sql", "SELECT ts, name FROM customers");
    workspace.write("customers.csv", "ts,name\n2024-01-05 10:00:00,Annie\n");
    let config = workspace.write_keyed_config("customers.csv", "[ts]", "[name]", "");

    let run = pipeline(&config).run(RunMode::Execute);
    assert!(run.error.is_none(), "unexpected error: {:?}", run.error);
    assert_eq!(run.report.outcome, Outcome::Committed);
    assert_eq!(run.report.statements_executed, 1);
    assert_eq!(run.report.zero_row_updates, 0);
    assert_eq!(workspace.strings("SELECT name FROM customers"), vec!["Annie"]);
    assert_eq!(workspace.strings("SELECT ts FROM customers"), vec!["2024-01-05T10:00:00"]);

    let second = pipeline(&config).run(RunMode::Execute);
    assert_eq!(second.report.outcome, Outcome::NothingToDo);
}

#[test]
fn sub_second_datetimes_converge() {
    let workspace = SyncWorkspace::new();
    workspace.create_database(
        "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL, seen DATETIME);
         INSERT INTO customers VALUES (1, 'Ann', '2024-01-05 10:00:00');",
    );
    workspace.write_secret();
    workspace.write("query.sql", "SELECT id, name, seen FROM customers");
    workspace.write("customers.csv", "id,name,seen\n1,Ann,2024-01-05 10:00:00.500\n");
    let config = workspace.write_keyed_config("customers.csv", "[id]", "[seen]", "");

    let first = pipeline(&config).run(RunMode::Execute);
    assert!(first.error.is_none(), "unexpected error: {:?}", first.error);
    assert_eq!(first.report.outcome, Outcome::Committed);
    assert_eq!(first.report.intents[0].changed, vec!["seen"]);
    assert_eq!(
        workspace.strings("SELECT seen FROM customers"),
        vec!["2024-01-05 10:00:00.500"]
    );

    let second = pipeline(&config).run(RunMode::Execute);
    assert!(second.error.is_none());
    assert_eq!(second.report.outcome, Outcome::NothingToDo);
    assert_eq!(second.report.unchanged, 1);
}
