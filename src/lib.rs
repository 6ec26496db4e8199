pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod executor;
pub mod io_utils;
pub mod key;
pub mod normalize;
pub mod reconcile;
pub mod report;
pub mod row;
pub mod source;
pub mod statement;
pub mod sync;
pub mod table;

use std::{env, fs, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    cli::{Cli, Commands, OverrideArgs},
    config::SyncConfig,
    report::ReportFormat,
    sync::{Pipeline, RunMode},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sheet_sync", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => handle_sync(&args),
        Commands::Plan(args) => handle_plan(&args),
        Commands::Preview(args) => handle_preview(&args),
    }
}

fn load_config(args: &OverrideArgs) -> Result<SyncConfig> {
    let mut config = SyncConfig::load(&args.config)
        .with_context(|| format!("Loading config from {:?}", args.config))?;
    if let Some(table) = &args.table {
        config.target_table = table.clone();
    }
    if let Some(worksheet) = &args.worksheet {
        config.spreadsheet.worksheet = worksheet.clone();
    }
    if let Some(epsilon) = args.epsilon {
        config.float_epsilon = epsilon;
    }
    config.validate().context("Applying command-line overrides")?;
    Ok(config)
}

fn handle_sync(args: &cli::SyncArgs) -> Result<()> {
    let config = load_config(&args.overrides)?;
    info!(
        "Syncing worksheet '{}' into table '{}'",
        config.spreadsheet.worksheet, config.target_table
    );
    let pipeline = Pipeline::new(config)?;
    let mode = if args.dry_run {
        RunMode::DryRun
    } else {
        RunMode::Execute
    };
    let run = pipeline.run(mode);
    let rendered = run.report.render(args.report_format)?;
    print!("{rendered}");
    if args.report_format == ReportFormat::Json {
        println!();
    }
    if let Some(path) = &args.report {
        fs::write(path, &rendered).with_context(|| format!("Writing report to {path:?}"))?;
        info!("Report written to {path:?}");
    }
    run.into_result().context("Sync aborted")?;
    Ok(())
}

fn handle_plan(args: &cli::PlanArgs) -> Result<()> {
    let config = load_config(&args.overrides)?;
    let pipeline = Pipeline::new(config)?;
    let run = pipeline.run(RunMode::DryRun);
    if let Some(err) = run.error {
        print!("{}", run.report.render_text());
        return Err(err).context("Planning aborted");
    }
    if run.statements.is_empty() {
        println!("-- no changes");
    }
    for (idx, statement) in run.statements.iter().enumerate() {
        let params = statement
            .params
            .iter()
            .enumerate()
            .map(|(pos, value)| format!("?{} = {}", pos + 1, value.as_display()))
            .collect::<Vec<_>>()
            .join(", ");
        println!("-- [{}] key {}: {}", idx + 1, statement.key, params);
        println!("{};", statement.sql);
    }
    if let Some(digest) = &run.report.plan_digest {
        println!("-- plan digest {digest}");
    }
    Ok(())
}

fn handle_preview(args: &cli::PreviewArgs) -> Result<()> {
    if args.rows == 0 {
        bail!("--rows must be at least 1");
    }
    let config = load_config(&args.overrides)?;
    let pipeline = Pipeline::new(config)?;
    let (headers, rows) = pipeline
        .preview(args.rows)
        .context("Previewing spreadsheet rows")?;
    let cells = rows
        .iter()
        .map(|row| {
            headers
                .iter()
                .map(|field| row.get(field).map(|v| v.as_display()).unwrap_or_default())
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    table::print_table(&headers, &cells);
    info!("Displayed {} row(s)", cells.len());
    Ok(())
}
