#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tempfile::{TempDir, tempdir};

pub const PROJECT: &str = "acme";
pub const SECRET: &str = "crm-db";

pub const CUSTOMERS_SCHEMA: &str = "
    CREATE TABLE customers (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        amount REAL,
        joined DATE
    );";

pub const CUSTOMERS_QUERY: &str = "SELECT id, name, amount, joined FROM customers ORDER BY id";

/// Scratch directory holding a SQLite database, a secret store, a query file,
/// a spreadsheet export and the config tying them together.
pub struct SyncWorkspace {
    temp_dir: TempDir,
}

impl SyncWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    pub fn database_path(&self) -> PathBuf {
        self.path().join("crm.db")
    }

    pub fn create_database(&self, sql: &str) -> PathBuf {
        let path = self.database_path();
        let conn = Connection::open(&path).expect("create database");
        conn.execute_batch(sql).expect("seed database");
        path
    }

    pub fn open_database(&self) -> Connection {
        Connection::open(self.database_path()).expect("open database")
    }

    /// Secret store entry pointing at the workspace database.
    pub fn write_secret(&self) -> PathBuf {
        let bundle = serde_json::json!({
            "user": "sync",
            "password": "hunter2",
            "dsn": self.database_path().to_string_lossy(),
        });
        self.write(
            &format!("secrets/projects/{PROJECT}/secrets/{SECRET}.json"),
            &bundle.to_string(),
        )
    }

    /// Config using the workspace's secret store, `query.sql` and `sheet`.
    pub fn write_config(&self, sheet: &str, extra: &str) -> PathBuf {
        self.write_keyed_config(sheet, "[id]", "[name, amount, joined]", extra)
    }

    /// Like [`SyncWorkspace::write_config`] with a custom key and compared
    /// columns (YAML flow sequences).
    pub fn write_keyed_config(&self, sheet: &str, key: &str, allow: &str, extra: &str) -> PathBuf {
        let yaml = format!(
            "target_table: customers
key: {key}
compare:
  allow: {allow}
credentials:
  project: {PROJECT}
  secret: {SECRET}
  store: secrets
spreadsheet:
  id: {sheet}
  worksheet: customers
query:
  path: query.sql
{extra}"
        );
        self.write("sync.yml", &yaml)
    }

    /// Runs a single-column text query against the workspace database.
    pub fn strings(&self, sql: &str) -> Vec<String> {
        let conn = self.open_database();
        let mut stmt = conn.prepare(sql).expect("prepare query");
        stmt.query_map([], |row| row.get(0))
            .expect("run query")
            .collect::<rusqlite::Result<Vec<_>>>()
            .expect("collect rows")
    }

    pub fn names(&self) -> Vec<(i64, String)> {
        let conn = self.open_database();
        let mut stmt = conn
            .prepare("SELECT id, name FROM customers ORDER BY id")
            .expect("prepare names");
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .expect("query names")
            .collect::<rusqlite::Result<Vec<_>>>()
            .expect("collect names")
    }
}

/// The customers scenario: two matching rows, one name change, one row only
/// in the sheet and one only in the database.
pub fn customers_workspace() -> (SyncWorkspace, PathBuf) {
    let workspace = SyncWorkspace::new();
    workspace.create_database(&format!(
        "{CUSTOMERS_SCHEMA}
         INSERT INTO customers VALUES (1, 'Ann', 10.0, '2024-01-05');
         INSERT INTO customers VALUES (2, 'Bob', 5.0, NULL);
         INSERT INTO customers VALUES (4, 'Dee', 7.5, '2023-12-31');"
    ));
    workspace.write_secret();
    workspace.write("query.sql", CUSTOMERS_QUERY);
    workspace.write(
        "customers.csv",
        "ID,Name,Amount,Joined\n1,Ann,10.00,2024-01-05\n2,Bo,5,\n3,Cy,1,\n",
    );
    let config = workspace.write_config("customers.csv", "");
    (workspace, config)
}
