//! External collaborators: credential lookup, spreadsheet reads and the
//! database query. Each returns a fully materialized snapshot; nothing here
//! streams.

pub mod credentials;
pub mod database;
pub mod sheet;

use crate::data::Value;

/// Header row plus data rows exactly as the spreadsheet returned them.
///
/// A record shorter than `headers` is missing the trailing fields; that is
/// distinct from a present-but-blank cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetSnapshot {
    pub headers: Vec<String>,
    pub records: Vec<Vec<Value>>,
}

impl SheetSnapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbColumn {
    pub name: String,
    pub declared_type: Option<String>,
}

/// Result set of the sync query, with column metadata from the statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseSnapshot {
    pub columns: Vec<DbColumn>,
    pub rows: Vec<Vec<Value>>,
}

impl DatabaseSnapshot {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First non-null value returned in column `idx`, if any.
    pub fn first_value(&self, idx: usize) -> Option<&Value> {
        self.rows
            .iter()
            .filter_map(|row| row.get(idx))
            .find(|value| !value.is_null())
    }
}
