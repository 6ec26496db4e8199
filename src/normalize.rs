//! Row normalization: raw spreadsheet records and database rows into [`Row`]s.
//!
//! Field names on both sides pass through the same [`HeaderCase`] so a sheet
//! header `Name` and a database column `NAME` address one field. Types come
//! from a [`TypeHints`] table resolved once per run: explicit column hints
//! first, then the query's declared column types, then the type of the first
//! non-null value the database returned.

use std::collections::{BTreeSet, HashMap};

use heck::ToSnakeCase;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    data::{FieldType, Value, coerce_value},
    error::NormalizationError,
    row::{Provenance, Row},
    source::{DatabaseSnapshot, SheetSnapshot},
};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HeaderCase {
    #[default]
    Lower,
    Snake,
    Preserve,
}

impl HeaderCase {
    pub fn apply(&self, name: &str) -> String {
        let trimmed = name.trim();
        match self {
            HeaderCase::Lower => trimmed.to_lowercase(),
            HeaderCase::Snake => trimmed.to_snake_case(),
            HeaderCase::Preserve => trimmed.to_string(),
        }
    }
}

/// Per-column hint from the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnHint {
    /// Spreadsheet header this hint applies to.
    pub name: String,
    /// Database column the header maps onto, when it differs from the header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<FieldType>,
    /// strftime pattern for date/datetime cells.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Hint {
    datatype: FieldType,
    format: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TypeHints {
    header_case: HeaderCase,
    hints: HashMap<String, Hint>,
    renames: HashMap<String, String>,
    required: BTreeSet<String>,
}

impl TypeHints {
    pub fn new(header_case: HeaderCase) -> Self {
        Self {
            header_case,
            ..Self::default()
        }
    }

    /// Builds the hint table for one run from configuration and the database
    /// snapshot's metadata.
    pub fn resolve(
        columns: &[ColumnHint],
        header_case: HeaderCase,
        database: &DatabaseSnapshot,
    ) -> Self {
        let mut table = TypeHints::new(header_case);
        for column in columns {
            let header = header_case.apply(&column.name);
            let field = column
                .field
                .as_deref()
                .map(|f| header_case.apply(f))
                .unwrap_or_else(|| header.clone());
            if field != header {
                table.renames.insert(header, field.clone());
            }
            if let Some(datatype) = column.datatype {
                table.hints.insert(
                    field.clone(),
                    Hint {
                        datatype,
                        format: column.format.clone(),
                    },
                );
            }
            if column.required {
                table.required.insert(field);
            }
        }
        for (idx, column) in database.columns.iter().enumerate() {
            let field = header_case.apply(&column.name);
            if table.hints.contains_key(&field) {
                continue;
            }
            let inferred = column
                .declared_type
                .as_deref()
                .and_then(FieldType::from_declared_type)
                .or_else(|| database.first_value(idx).and_then(Value::field_type));
            if let Some(datatype) = inferred {
                debug!("Field '{field}' typed as {datatype} from database metadata");
                table.hints.insert(
                    field,
                    Hint {
                        datatype,
                        format: None,
                    },
                );
            }
        }
        table
    }

    pub fn header_case(&self) -> HeaderCase {
        self.header_case
    }

    /// Declared database column name for each normalized database field.
    pub fn column_names(&self, snapshot: &DatabaseSnapshot) -> HashMap<String, String> {
        snapshot
            .columns
            .iter()
            .map(|column| (self.header_case.apply(&column.name), column.name.clone()))
            .collect()
    }

    /// Normalized field name for a raw spreadsheet header or database column.
    pub fn field_name(&self, raw: &str) -> String {
        let normalized = self.header_case.apply(raw);
        self.renames.get(&normalized).cloned().unwrap_or(normalized)
    }

    pub fn datatype(&self, field: &str) -> Option<FieldType> {
        self.hints.get(field).map(|hint| hint.datatype)
    }

    fn coerce(&self, field: &str, value: Value) -> Result<Value, NormalizationError> {
        match self.hints.get(field) {
            Some(hint) => coerce_value(field, value, hint.datatype, hint.format.as_deref()),
            None => Ok(match value {
                Value::String(s) if s.trim().is_empty() => Value::Null,
                other => other,
            }),
        }
    }
}

/// A row that could not be normalized and was left out of reconciliation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NormalizationFailure {
    pub side: Provenance,
    pub position: usize,
    #[serde(serialize_with = "serialize_display")]
    pub error: NormalizationError,
}

fn serialize_display<S: serde::Serializer>(
    error: &NormalizationError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub rows: Vec<Row>,
    pub failures: Vec<NormalizationFailure>,
}

pub struct Normalizer<'a> {
    hints: &'a TypeHints,
}

impl<'a> Normalizer<'a> {
    pub fn new(hints: &'a TypeHints) -> Self {
        Self { hints }
    }

    /// Spreadsheet positions are sheet row numbers, so the first data row
    /// under the header is row 2.
    pub fn normalize_sheet(&self, snapshot: &SheetSnapshot) -> Normalized {
        let fields = snapshot
            .headers
            .iter()
            .map(|header| self.hints.field_name(header))
            .collect::<Vec<_>>();
        let mut normalized = Normalized::default();
        for (idx, record) in snapshot.records.iter().enumerate() {
            let position = idx + 2;
            match self.sheet_row(&fields, record, position) {
                Ok(row) => normalized.rows.push(row),
                Err(error) => {
                    warn!("Skipping spreadsheet row {position}: {error}");
                    normalized.failures.push(NormalizationFailure {
                        side: Provenance::Spreadsheet,
                        position,
                        error,
                    });
                }
            }
        }
        normalized
    }

    fn sheet_row(
        &self,
        fields: &[String],
        record: &[Value],
        position: usize,
    ) -> Result<Row, NormalizationError> {
        let mut row = Row::new(Provenance::Spreadsheet, position);
        for (idx, field) in fields.iter().enumerate() {
            let Some(cell) = record.get(idx) else {
                continue;
            };
            let value = self.hints.coerce(field, cell.clone())?;
            row.push(field.clone(), value)?;
        }
        self.check_required(&row)?;
        Ok(row)
    }

    /// Database values keep their native storage class. The one exception is
    /// text in a date or datetime column, which SQLite has no type for.
    pub fn normalize_database(&self, snapshot: &DatabaseSnapshot) -> Normalized {
        let fields = snapshot
            .columns
            .iter()
            .map(|column| self.hints.header_case().apply(&column.name))
            .collect::<Vec<_>>();
        let mut normalized = Normalized::default();
        for (idx, values) in snapshot.rows.iter().enumerate() {
            let position = idx + 1;
            match self.database_row(&fields, values, position) {
                Ok(row) => normalized.rows.push(row),
                Err(error) => {
                    warn!("Skipping database row {position}: {error}");
                    normalized.failures.push(NormalizationFailure {
                        side: Provenance::Database,
                        position,
                        error,
                    });
                }
            }
        }
        normalized
    }

    fn database_row(
        &self,
        fields: &[String],
        values: &[Value],
        position: usize,
    ) -> Result<Row, NormalizationError> {
        if values.len() != fields.len() {
            return Err(NormalizationError::ArityMismatch {
                values: values.len(),
                columns: fields.len(),
            });
        }
        let mut row = Row::new(Provenance::Database, position);
        for (field, value) in fields.iter().zip(values) {
            match (value, self.hints.datatype(field)) {
                (Value::String(_), Some(ty)) if ty.is_temporal() => {
                    let converted = self.hints.coerce(field, value.clone())?;
                    row.push_converted(field.clone(), converted, value.clone())?;
                }
                _ => row.push(field.clone(), value.clone())?,
            }
        }
        self.check_required(&row)?;
        Ok(row)
    }

    fn check_required(&self, row: &Row) -> Result<(), NormalizationError> {
        match self.hints.required.iter().find(|field| !row.contains(field)) {
            Some(field) => Err(NormalizationError::MissingField {
                field: field.clone(),
            }),
            None => Ok(()),
        }
    }
}
