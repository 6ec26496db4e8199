//! Run summary. A report is produced for every run, including aborted ones,
//! and records how far the pipeline got.

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use itertools::Itertools;
use serde::Serialize;

use crate::{
    error::SyncError,
    executor::ExecutionOutcome,
    key::Key,
    normalize::NormalizationFailure,
    reconcile::{ReconciliationResult, UnkeyableRow},
    row::Provenance,
    table,
};

/// Last pipeline stage that completed.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    #[default]
    Started,
    Connected,
    Fetched,
    Normalized,
    Reconciled,
    Planned,
    Executed,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Committed,
    DryRun,
    NothingToDo,
    Aborted { kind: String, message: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UnkeyableEntry {
    pub side: Provenance,
    pub position: usize,
    pub reason: String,
}

impl From<&UnkeyableRow> for UnkeyableEntry {
    fn from(row: &UnkeyableRow) -> Self {
        Self {
            side: row.row.provenance,
            position: row.row.position,
            reason: row.reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IntentSummary {
    pub key: Key,
    pub changed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SyncReport {
    pub stage: RunStage,
    pub outcome: Outcome,
    pub spreadsheet_rows: usize,
    pub database_rows: usize,
    pub normalization_failures: Vec<NormalizationFailure>,
    pub unkeyable_rows: Vec<UnkeyableEntry>,
    pub unchanged: usize,
    pub unmatched_spreadsheet_keys: Vec<Key>,
    pub unmatched_database_keys: Vec<Key>,
    pub intents: Vec<IntentSummary>,
    pub statements_planned: usize,
    pub statements_executed: usize,
    pub statements_rolled_back: usize,
    pub zero_row_updates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failing_key: Option<Key>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_digest: Option<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    #[serde(skip)]
    clock: Option<Instant>,
}

impl Default for SyncReport {
    fn default() -> Self {
        Self {
            stage: RunStage::Started,
            outcome: Outcome::Aborted {
                kind: "incomplete".into(),
                message: "run did not finish".into(),
            },
            spreadsheet_rows: 0,
            database_rows: 0,
            normalization_failures: Vec::new(),
            unkeyable_rows: Vec::new(),
            unchanged: 0,
            unmatched_spreadsheet_keys: Vec::new(),
            unmatched_database_keys: Vec::new(),
            intents: Vec::new(),
            statements_planned: 0,
            statements_executed: 0,
            statements_rolled_back: 0,
            zero_row_updates: 0,
            failing_key: None,
            plan_digest: None,
            started_at: Utc::now(),
            elapsed_ms: 0,
            clock: None,
        }
    }
}

impl SyncReport {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            clock: Some(Instant::now()),
            ..Self::default()
        }
    }

    pub fn reached(&mut self, stage: RunStage) {
        self.stage = self.stage.max(stage);
    }

    pub fn record_reconciliation(&mut self, result: &ReconciliationResult) {
        self.unkeyable_rows = result.unkeyable_rows.iter().map(UnkeyableEntry::from).collect();
        self.unchanged = result.unchanged_keys.len();
        self.unmatched_spreadsheet_keys = result.unmatched_spreadsheet_keys.clone();
        self.unmatched_database_keys = result.unmatched_database_keys.clone();
        self.intents = result
            .intents
            .iter()
            .map(|intent| IntentSummary {
                key: intent.key.clone(),
                changed: intent.changed_names().map(str::to_string).collect(),
            })
            .collect();
        self.reached(RunStage::Reconciled);
    }

    pub fn record_execution(&mut self, outcome: &ExecutionOutcome) {
        self.statements_executed = outcome.applied;
        self.zero_row_updates = outcome.zero_row_updates();
        self.reached(RunStage::Executed);
    }

    pub fn record_error(&mut self, error: &SyncError) {
        match error {
            SyncError::StatementExecution { key, .. } => {
                self.failing_key = Some(key.clone());
                self.mark_rolled_back();
            }
            // A failed begin or commit discards the whole batch.
            SyncError::Transaction(_) if self.stage >= RunStage::Planned => {
                self.mark_rolled_back();
            }
            _ => {}
        }
        self.outcome = Outcome::Aborted {
            kind: error.kind().to_string(),
            message: error.to_string(),
        };
    }

    fn mark_rolled_back(&mut self) {
        self.statements_rolled_back = self.statements_planned;
        self.statements_executed = 0;
    }

    pub fn finish(&mut self, outcome: Option<Outcome>) {
        if let Some(outcome) = outcome {
            self.outcome = outcome;
        }
        if let Some(clock) = self.clock {
            self.elapsed_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, Outcome::Aborted { .. })
    }

    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Text => Ok(self.render_text()),
            ReportFormat::Json => {
                serde_json::to_string_pretty(self).context("Serializing sync report to JSON")
            }
        }
    }

    pub fn render_text(&self) -> String {
        let outcome = match &self.outcome {
            Outcome::Committed => "committed".to_string(),
            Outcome::DryRun => "dry run".to_string(),
            Outcome::NothingToDo => "nothing to do".to_string(),
            Outcome::Aborted { kind, message } => format!("aborted ({kind}): {message}"),
        };
        let stage = serde_json::to_value(self.stage)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let mut pairs = vec![
            ("outcome", outcome),
            ("stage", stage),
            ("started_at", self.started_at.to_rfc3339()),
            ("elapsed_ms", self.elapsed_ms.to_string()),
            ("spreadsheet_rows", self.spreadsheet_rows.to_string()),
            ("database_rows", self.database_rows.to_string()),
            ("normalization_failures", self.normalization_failures.len().to_string()),
            ("unkeyable_rows", self.unkeyable_rows.len().to_string()),
            ("unchanged", self.unchanged.to_string()),
            ("unmatched_spreadsheet", format_keys(&self.unmatched_spreadsheet_keys)),
            ("unmatched_database", format_keys(&self.unmatched_database_keys)),
            ("statements_planned", self.statements_planned.to_string()),
            ("statements_executed", self.statements_executed.to_string()),
            ("statements_rolled_back", self.statements_rolled_back.to_string()),
            ("zero_row_updates", self.zero_row_updates.to_string()),
        ];
        if let Some(key) = &self.failing_key {
            pairs.push(("failing_key", key.to_string()));
        }
        if let Some(digest) = &self.plan_digest {
            pairs.push(("plan_digest", digest.clone()));
        }
        let mut output = table::render_pairs(&pairs);

        if !self.intents.is_empty() {
            output.push('\n');
            let rows = self
                .intents
                .iter()
                .map(|intent| vec![intent.key.to_string(), intent.changed.join(", ")])
                .collect::<Vec<_>>();
            output.push_str(&table::render_table(
                &["key".to_string(), "changed".to_string()],
                &rows,
            ));
        }

        let diagnostics = self
            .normalization_failures
            .iter()
            .map(|f| vec![f.side.to_string(), f.position.to_string(), f.error.to_string()])
            .chain(self.unkeyable_rows.iter().map(|u| {
                vec![u.side.to_string(), u.position.to_string(), u.reason.clone()]
            }))
            .collect::<Vec<_>>();
        if !diagnostics.is_empty() {
            output.push('\n');
            output.push_str(&table::render_table(
                &["side".to_string(), "row".to_string(), "problem".to_string()],
                &diagnostics,
            ));
        }
        output
    }
}

fn format_keys(keys: &[Key]) -> String {
    if keys.is_empty() {
        "-".to_string()
    } else {
        keys.iter().join(", ")
    }
}
