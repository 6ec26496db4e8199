//! SQLite collaborator: connection bootstrap, the snapshot query, and the
//! conversions between [`Value`] and SQLite storage classes.

use std::{path::Path, time::Duration};

use encoding_rs::UTF_8;
use log::{debug, info};
use rusqlite::{
    Connection, OpenFlags, ToSql,
    types::{ToSqlOutput, ValueRef},
};

use crate::{
    data::Value,
    error::{Result, SyncError},
    io_utils,
    row::Provenance,
    source::{DatabaseSnapshot, DbColumn, credentials::SecretBundle},
};

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Opens the database named by the bundle's dsn.
///
/// The file must already exist; SQLite has no authentication so the bundle's
/// user and password are not sent anywhere.
pub fn open_connection(bundle: &SecretBundle) -> Result<Connection> {
    info!("Connecting to database...");
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(&bundle.dsn, flags)
        .map_err(|err| SyncError::Credential(format!("connecting to '{}': {err}", bundle.dsn)))?;
    configure_connection(&conn)
        .map_err(|err| SyncError::Credential(format!("configuring '{}': {err}", bundle.dsn)))?;
    debug!("Connected to '{}' as '{}'", bundle.dsn, bundle.user);
    Ok(conn)
}

pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

pub fn load_query(path: &Path) -> Result<String> {
    io_utils::read_text(path, UTF_8)
        .map_err(|err| SyncError::fetch(Provenance::Database, format!("{err:#}")))
}

/// Runs `sql` with named parameters (`:name`) and materializes every row.
pub fn fetch_snapshot(
    conn: &Connection,
    sql: &str,
    params: &[(String, Value)],
) -> Result<DatabaseSnapshot> {
    info!("Gathering data...");
    let fetch_err = |err: rusqlite::Error| SyncError::fetch(Provenance::Database, err.to_string());
    let mut stmt = conn.prepare(sql).map_err(fetch_err)?;
    let columns = stmt
        .columns()
        .iter()
        .map(|column| DbColumn {
            name: column.name().to_string(),
            declared_type: column.decl_type().map(str::to_string),
        })
        .collect::<Vec<_>>();

    let named = params
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect::<Vec<_>>();
    let mut rows = stmt.query(named.as_slice()).map_err(fetch_err)?;
    let mut materialized = Vec::new();
    while let Some(row) = rows.next().map_err(fetch_err)? {
        let values = (0..columns.len())
            .map(|idx| row.get_ref(idx).map(value_from_sql))
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(fetch_err)?;
        materialized.push(values);
    }
    info!("Fetched {} row(s) from database.", materialized.len());
    Ok(DatabaseSnapshot {
        columns,
        rows: materialized,
    })
}

/// Blobs are read as lossy UTF-8 text; there is no blob field type.
pub fn value_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Boolean(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*b))),
            Value::Integer(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*f)),
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Date(d) => {
                ToSqlOutput::Owned(rusqlite::types::Value::Text(d.format("%Y-%m-%d").to_string()))
            }
            Value::DateTime(dt) => ToSqlOutput::Owned(rusqlite::types::Value::Text(
                dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            )),
        })
    }
}
