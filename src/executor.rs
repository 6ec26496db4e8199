//! Applies an update batch inside a single transaction.

use log::{debug, info, warn};
use rusqlite::{Connection, params_from_iter};
use serde::Serialize;

use crate::{
    error::{Result, SyncError},
    statement::UpdateStatement,
};

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub applied: usize,
    /// Affected-row count per statement, in execution order.
    pub rows_affected: Vec<usize>,
}

impl ExecutionOutcome {
    pub fn zero_row_updates(&self) -> usize {
        self.rows_affected.iter().filter(|count| **count == 0).count()
    }
}

pub struct Executor<'c> {
    conn: &'c mut Connection,
}

impl<'c> Executor<'c> {
    pub fn new(conn: &'c mut Connection) -> Self {
        Self { conn }
    }

    /// Runs every statement or none of them.
    ///
    /// On failure the transaction is rolled back and the error names the
    /// 1-based statement index and its key.
    pub fn apply(&mut self, statements: &[UpdateStatement]) -> Result<ExecutionOutcome> {
        if statements.is_empty() {
            info!("No statements to execute.");
            return Ok(ExecutionOutcome::default());
        }
        info!("Executing {} statement(s)...", statements.len());
        let tx = self.conn.transaction().map_err(SyncError::Transaction)?;
        let mut outcome = ExecutionOutcome::default();
        for (idx, statement) in statements.iter().enumerate() {
            debug!("[{}] {}", idx + 1, statement.sql);
            let result = tx.execute(&statement.sql, params_from_iter(statement.params.iter()));
            match result {
                Ok(count) => {
                    if count == 0 {
                        warn!("Update for key {} matched no rows", statement.key);
                    }
                    outcome.rows_affected.push(count);
                    outcome.applied += 1;
                }
                Err(source) => {
                    if let Err(rollback) = tx.rollback() {
                        warn!("Rollback after failed statement reported: {rollback}");
                    }
                    return Err(SyncError::StatementExecution {
                        index: idx + 1,
                        key: statement.key.clone(),
                        source,
                    });
                }
            }
        }
        tx.commit().map_err(SyncError::Transaction)?;
        info!("Committed {} statement(s).", outcome.applied);
        Ok(outcome)
    }
}
