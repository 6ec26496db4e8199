use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::report::ReportFormat;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Reconcile spreadsheet rows against a database table",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch both sides, reconcile, and apply the updates in one transaction
    Sync(SyncArgs),
    /// Print the UPDATE statements a sync would run without executing them
    Plan(PlanArgs),
    /// Show the first normalized spreadsheet rows in a formatted table
    Preview(PreviewArgs),
}

/// Settings that override the configuration file for a single run.
#[derive(Debug, Args, Clone, Default)]
pub struct OverrideArgs {
    /// Sync configuration file (YAML)
    #[arg(short, long)]
    pub config: PathBuf,
    /// Target table, replacing `target_table` from the config
    #[arg(long)]
    pub table: Option<String>,
    /// Worksheet to read, replacing `spreadsheet.worksheet` from the config
    #[arg(long)]
    pub worksheet: Option<String>,
    /// Relative float tolerance, replacing `float_epsilon` from the config
    #[arg(long)]
    pub epsilon: Option<f64>,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[command(flatten)]
    pub overrides: OverrideArgs,
    /// Reconcile and plan, but do not execute any statement
    #[arg(long)]
    pub dry_run: bool,
    /// Report format written to stdout (and to --report when given)
    #[arg(long = "report-format", value_enum, default_value_t = ReportFormat::Text)]
    pub report_format: ReportFormat,
    /// Also write the report to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub overrides: OverrideArgs,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub overrides: OverrideArgs,
    /// Number of rows to display
    #[arg(long, default_value_t = 10)]
    pub rows: usize,
}
