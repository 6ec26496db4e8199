//! The sync pipeline: fetch, normalize, reconcile, build, execute, report.

use anyhow::Context;
use log::{debug, info};
use rusqlite::Connection;

use crate::{
    config::SyncConfig,
    error::{Result, SyncError},
    executor::Executor,
    io_utils,
    key::KeySpec,
    normalize::{Normalized, Normalizer, TypeHints},
    reconcile::{Reconciler, ReconciliationResult},
    report::{Outcome, RunStage, SyncReport},
    row::{Provenance, Row},
    source::{
        DatabaseSnapshot, SheetSnapshot,
        credentials::{CredentialSource, EnvCredentialSource, SecretStoreSource},
        database,
        sheet::{SpreadsheetSource, WorkbookSource},
    },
    statement::{self, StatementBuilder, UpdateStatement},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Execute,
    DryRun,
}

/// Everything a run produced. `report` is always populated, even when `error`
/// is set.
#[derive(Debug)]
pub struct SyncRun {
    pub report: SyncReport,
    pub statements: Vec<UpdateStatement>,
    pub error: Option<SyncError>,
}

impl SyncRun {
    pub fn into_result(self) -> Result<SyncReport> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.report),
        }
    }
}

struct Fetched {
    conn: Connection,
    sheet: SheetSnapshot,
    database: DatabaseSnapshot,
}

pub struct Pipeline {
    config: SyncConfig,
    credentials: Box<dyn CredentialSource>,
    sheets: Box<dyn SpreadsheetSource>,
}

impl Pipeline {
    /// Wires the file-backed collaborators the configuration names.
    pub fn new(config: SyncConfig) -> anyhow::Result<Self> {
        let encoding = io_utils::resolve_encoding(config.spreadsheet.encoding.as_deref())
            .context("Resolving spreadsheet encoding")?;
        let credentials: Box<dyn CredentialSource> = match &config.credentials.store {
            Some(store) => Box::new(SecretStoreSource::new(store)),
            None => Box::new(EnvCredentialSource),
        };
        Ok(Self::with_sources(
            config,
            credentials,
            Box::new(WorkbookSource::new(encoding)),
        ))
    }

    pub fn with_sources(
        config: SyncConfig,
        credentials: Box<dyn CredentialSource>,
        sheets: Box<dyn SpreadsheetSource>,
    ) -> Self {
        Self {
            config,
            credentials,
            sheets,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn run(&self, mode: RunMode) -> SyncRun {
        let mut report = SyncReport::start();
        let mut statements = Vec::new();
        let result = self.run_stages(mode, &mut report, &mut statements);
        let error = match result {
            Ok(outcome) => {
                report.finish(Some(outcome));
                None
            }
            Err(err) => {
                report.record_error(&err);
                report.finish(None);
                Some(err)
            }
        };
        info!(
            "Run finished at stage {:?} in {} ms.",
            report.stage, report.elapsed_ms
        );
        SyncRun {
            report,
            statements,
            error,
        }
    }

    /// Normalized spreadsheet rows, typed with the same hints a run would use.
    pub fn preview(&self, limit: usize) -> Result<(Vec<String>, Vec<Row>)> {
        let fetched = self.fetch(&mut SyncReport::default())?;
        let hints = self.hints(&fetched)?;
        let mut normalized = Normalizer::new(&hints).normalize_sheet(&fetched.sheet);
        normalized.rows.truncate(limit);
        let headers = fetched
            .sheet
            .headers
            .iter()
            .map(|h| hints.field_name(h))
            .collect();
        Ok((headers, normalized.rows))
    }

    fn run_stages(
        &self,
        mode: RunMode,
        report: &mut SyncReport,
        statements: &mut Vec<UpdateStatement>,
    ) -> Result<Outcome> {
        let mut fetched = self.fetch(report)?;

        let hints = self.hints(&fetched)?;
        let normalizer = Normalizer::new(&hints);
        let sheet = normalizer.normalize_sheet(&fetched.sheet);
        let database = normalizer.normalize_database(&fetched.database);
        record_failures(report, &sheet, &database);
        report.reached(RunStage::Normalized);

        let result = self.reconcile(&hints, &sheet.rows, &database.rows)?;
        report.record_reconciliation(&result);

        let builder = StatementBuilder::new(&self.config.target_table, &self.config.key)?
            .with_columns(hints.column_names(&fetched.database));
        *statements = builder.build_all(&result.intents)?;
        report.statements_planned = statements.len();
        report.plan_digest = Some(statement::plan_digest(statements));
        report.reached(RunStage::Planned);
        info!(
            "Planned {} update(s): {} unchanged, {} unmatched in spreadsheet, {} unmatched in database.",
            statements.len(),
            result.unchanged_keys.len(),
            result.unmatched_spreadsheet_keys.len(),
            result.unmatched_database_keys.len()
        );

        if statements.is_empty() {
            info!("Nothing to update.");
            return Ok(Outcome::NothingToDo);
        }
        if mode == RunMode::DryRun {
            info!("Dry run; no statements executed.");
            return Ok(Outcome::DryRun);
        }
        let outcome = Executor::new(&mut fetched.conn).apply(statements)?;
        report.record_execution(&outcome);
        Ok(Outcome::Committed)
    }

    fn fetch(&self, report: &mut SyncReport) -> Result<Fetched> {
        let bundle = self.credentials.fetch(&self.config.credentials.secret_id())?;
        let conn = database::open_connection(&bundle)?;
        report.reached(RunStage::Connected);

        info!(
            "Reading worksheet '{}' of '{}'",
            self.config.spreadsheet.worksheet, self.config.spreadsheet.id
        );
        let sheet = self
            .sheets
            .fetch(&self.config.spreadsheet.id, &self.config.spreadsheet.worksheet)?;
        let sql = database::load_query(&self.config.query.path)?;
        let database = database::fetch_snapshot(&conn, &sql, &self.config.query_params())?;
        report.spreadsheet_rows = sheet.len();
        report.database_rows = database.len();
        report.reached(RunStage::Fetched);
        Ok(Fetched {
            conn,
            sheet,
            database,
        })
    }

    /// Resolves type hints and checks that every key field exists on both
    /// sides.
    fn hints(&self, fetched: &Fetched) -> Result<TypeHints> {
        let hints = TypeHints::resolve(
            &self.config.columns,
            self.config.header_case,
            &fetched.database,
        );
        let sheet_fields = fetched
            .sheet
            .headers
            .iter()
            .map(|h| hints.field_name(h))
            .collect::<Vec<_>>();
        let db_fields = fetched
            .database
            .columns
            .iter()
            .map(|c| hints.header_case().apply(&c.name))
            .collect::<Vec<_>>();
        for key in &self.config.key {
            for (side, fields) in [
                (Provenance::Spreadsheet, &sheet_fields),
                (Provenance::Database, &db_fields),
            ] {
                if !fields.contains(key) {
                    return Err(SyncError::Config(format!(
                        "key field '{key}' is not a {side} column"
                    )));
                }
            }
        }
        debug!("Spreadsheet fields: {sheet_fields:?}; database fields: {db_fields:?}");
        Ok(hints)
    }

    fn reconcile(
        &self,
        hints: &TypeHints,
        sheet: &[Row],
        database: &[Row],
    ) -> Result<ReconciliationResult> {
        let types = self
            .config
            .key
            .iter()
            .map(|field| hints.datatype(field))
            .collect();
        let key = KeySpec::with_types(self.config.key.clone(), types);
        Reconciler::new(&key, &self.config.compare)
            .with_epsilon(self.config.float_epsilon)
            .reconcile(sheet, database)
    }
}

fn record_failures(report: &mut SyncReport, sheet: &Normalized, database: &Normalized) {
    report.normalization_failures = sheet
        .failures
        .iter()
        .chain(&database.failures)
        .cloned()
        .collect();
}
