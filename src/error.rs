//! Error taxonomy for a sync run.
//!
//! Dataset-level and batch-level failures are [`SyncError`] values and abort the
//! run. Row-level problems are [`NormalizationError`] values; the pipeline
//! records them as diagnostics and keeps going.

use thiserror::Error;

use crate::key::Key;
use crate::row::Provenance;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Secret lookup failed or the database refused the credentials.
    #[error("credential error: {0}")]
    Credential(String),

    /// Reading the spreadsheet or running the database query failed.
    #[error("failed to fetch {side} snapshot: {message}")]
    SourceFetch { side: Provenance, message: String },

    /// Two rows on one side share a key, so mutation targeting is ambiguous.
    #[error("duplicate key {key} in {side} rows {first_row} and {second_row}")]
    DuplicateKey {
        side: Provenance,
        key: Key,
        first_row: usize,
        second_row: usize,
    },

    /// A statement failed mid-batch; the whole transaction was rolled back.
    #[error("statement {index} for key {key} failed, batch rolled back: {source}")]
    StatementExecution {
        index: usize,
        key: Key,
        #[source]
        source: rusqlite::Error,
    },

    /// Beginning or committing the transaction failed.
    #[error("transaction error: {0}")]
    Transaction(#[source] rusqlite::Error),

    /// Invalid run configuration (identifiers, key spec, policy).
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn fetch(side: Provenance, message: impl Into<String>) -> Self {
        SyncError::SourceFetch {
            side,
            message: message.into(),
        }
    }

    /// Short machine-readable label used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Credential(_) => "credential",
            SyncError::SourceFetch { .. } => "source_fetch",
            SyncError::DuplicateKey { .. } => "duplicate_key",
            SyncError::StatementExecution { .. } => "statement_execution",
            SyncError::Transaction(_) => "transaction",
            SyncError::Config(_) => "config",
        }
    }
}

/// Reasons a single source row could not be normalized.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NormalizationError {
    #[error("required field '{field}' is missing")]
    MissingField { field: String },

    #[error("field '{field}': cannot parse '{value}' as {expected}")]
    Coercion {
        field: String,
        value: String,
        expected: String,
    },

    #[error("duplicate field '{field}' after header normalization")]
    DuplicateField { field: String },

    #[error("row has {values} value(s) but the query returned {columns} column(s)")]
    ArityMismatch { values: usize, columns: usize },

    #[error("field '{field}': unsupported cell content ({detail})")]
    Unsupported { field: String, detail: String },
}
