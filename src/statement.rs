//! UPDATE statements for mutation intents.
//!
//! Values are only ever bound as positional parameters. Identifiers (table and
//! column names) cannot be bound, so they are validated and double-quoted.

use std::{collections::HashMap, fmt::Write as _, sync::OnceLock};

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{
    data::Value,
    error::{Result, SyncError},
    key::Key,
    reconcile::MutationIntent,
};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UpdateStatement {
    pub key: Key,
    pub sql: String,
    pub params: Vec<Value>,
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"^[^"\p{Cc}]+$"#).expect("identifier pattern compiles"))
}

/// Rejects names that are blank or contain quotes or control characters.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.trim().is_empty() || !identifier_pattern().is_match(name) {
        return Err(SyncError::Config(format!("invalid identifier '{}'", name.escape_debug())));
    }
    Ok(())
}

pub fn quote_identifier(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{name}\""))
}

/// Quotes `schema.table` or a bare table name.
pub fn quote_table(name: &str) -> Result<String> {
    let parts = name.splitn(2, '.').collect::<Vec<_>>();
    let quoted = parts
        .into_iter()
        .map(quote_identifier)
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join("."))
}

#[derive(Debug, Clone)]
pub struct StatementBuilder {
    table: String,
    key_fields: Vec<String>,
    columns: HashMap<String, String>,
}

impl StatementBuilder {
    pub fn new(table: &str, key_fields: &[String]) -> Result<Self> {
        if key_fields.is_empty() {
            return Err(SyncError::Config("at least one key field is required".into()));
        }
        for field in key_fields {
            validate_identifier(field)?;
        }
        Ok(Self {
            table: quote_table(table)?,
            key_fields: key_fields.to_vec(),
            columns: HashMap::new(),
        })
    }

    /// Maps normalized field names to the column names the table declares.
    /// Fields without an entry are written under their own name.
    pub fn with_columns(mut self, columns: HashMap<String, String>) -> Self {
        self.columns = columns;
        self
    }

    fn column(&self, field: &str) -> Result<String> {
        let name = self.columns.get(field).map(String::as_str).unwrap_or(field);
        quote_identifier(name)
    }

    /// `UPDATE t SET a = ?1, b = ?2 WHERE k = ?3`.
    ///
    /// Key parameters are the values as stored in the database row the intent
    /// targets, not their normalized form.
    pub fn build(&self, intent: &MutationIntent) -> Result<UpdateStatement> {
        let mut sql = format!("UPDATE {} SET ", self.table);
        let mut params = Vec::with_capacity(intent.changed_fields.len() + self.key_fields.len());
        for (idx, field) in intent.changed_fields.iter().enumerate() {
            if idx > 0 {
                sql.push_str(", ");
            }
            params.push(field.value.clone());
            let _ = write!(sql, "{} = ?{}", self.column(&field.name)?, params.len());
        }
        sql.push_str(" WHERE ");
        for (idx, name) in self.key_fields.iter().enumerate() {
            if idx > 0 {
                sql.push_str(" AND ");
            }
            let value = intent
                .target_row
                .stored(name)
                .cloned()
                .or_else(|| intent.key.parts().get(idx).map(|part| part.to_value()))
                .ok_or_else(|| {
                    SyncError::Config(format!("key field '{name}' missing for key {}", intent.key))
                })?;
            params.push(value);
            let _ = write!(sql, "{} = ?{}", self.column(name)?, params.len());
        }
        Ok(UpdateStatement {
            key: intent.key.clone(),
            sql,
            params,
        })
    }

    pub fn build_all(&self, intents: &[MutationIntent]) -> Result<Vec<UpdateStatement>> {
        intents.iter().map(|intent| self.build(intent)).collect()
    }
}

/// Hex SHA-256 over statement text and bound values, in order.
pub fn plan_digest(statements: &[UpdateStatement]) -> String {
    let mut hasher = Sha256::new();
    for statement in statements {
        hasher.update(statement.sql.as_bytes());
        hasher.update([0u8]);
        for param in &statement.params {
            hasher.update(format!("{param:?}").as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update([b'\n']);
    }
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}
