//! `planning` command line: scrape configured council portals, or ask the
//! compliance gateway about a single URL.

mod config;
mod queue;
mod report;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use engine_logging::{engine_error, engine_info, engine_warn, LogDestination};
use planning_core::{RunStatus, SourceConfig};
use planning_engine::{
    ensure_output_dir, write_run_report, AggregateReport, ExportOptions, MultiSourceOrchestrator,
};

use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};
use crate::report::{render_decision, render_report, LogProgressSink};

#[derive(Parser)]
#[command(name = "planning", about = "Planning application collector", version)]
struct Cli {
    /// RON configuration file.
    #[arg(long, global = true, env = "PLANNING_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// file, terminal or both.
    #[arg(long, global = true, default_value = "terminal")]
    log_to: LogDestination,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every configured source.
    Run {
        /// Earliest received date, YYYY-MM-DD.
        #[arg(long)]
        from: NaiveDate,
    },
    /// Scrape one source.
    Source {
        id: String,
        #[arg(long)]
        from: NaiveDate,
    },
    /// Evaluate the compliance policy for a URL without fetching content.
    Check {
        url: String,
        /// Source whose agent and rate settings apply.
        #[arg(long)]
        source: Option<String>,
    },
    /// Read "<source-id|all> <YYYY-MM-DD>" jobs from stdin and run them in order.
    Queue,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            engine_error!("{:#}", err);
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::load(&cli.config)?;
    engine_logging::initialize(cli.log_to, config.level_filter()?);
    engine_info!(
        "loaded {} sources from {:?}",
        config.sources.len(),
        cli.config
    );

    match cli.command {
        Commands::Run { from } => block_on(scrape(&config, None, from))?,
        Commands::Source { id, from } => block_on(scrape(&config, Some(id), from))?,
        Commands::Check { url, source } => block_on(check(&config, &url, source))?,
        // The engine handle brings its own runtime.
        Commands::Queue => queue::run(&config),
    }
}

fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    Ok(runtime.block_on(future))
}

fn status_code(status: RunStatus) -> ExitCode {
    ExitCode::from(u8::try_from(status.exit_code()).unwrap_or(1))
}

async fn scrape(config: &AppConfig, source: Option<String>, from: NaiveDate) -> Result<ExitCode> {
    let context = config.context();
    let orchestrator = Arc::new(context.orchestrator(&config.source_entries())?);

    let watcher = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                engine_warn!("interrupt received, finishing in-flight work");
                orchestrator.cancel();
            }
        })
    };

    let progress = Arc::new(LogProgressSink);
    let result = match source.as_deref() {
        Some(id) => orchestrator.run_source(id, from, progress).await,
        None => orchestrator.run_all(from, progress).await,
    };
    watcher.abort();

    let report = result?;
    finish(config, &report);
    Ok(status_code(report.status))
}

/// Print the summary and leave the report next to the record files.
fn finish(config: &AppConfig, report: &AggregateReport) {
    print!("{}", render_report(report));
    if let Err(err) = write_report(&config.output_dir, report) {
        engine_warn!("run report not written: {:#}", err);
    }
}

fn write_report(output_dir: &Path, report: &AggregateReport) -> Result<()> {
    ensure_output_dir(output_dir)?;
    let summary = write_run_report(output_dir, report, ExportOptions::default())?;
    engine_info!(
        "report written to {:?} ({} record files, {} records)",
        summary.report_path,
        summary.file_count,
        summary.record_count
    );
    Ok(())
}

async fn check(config: &AppConfig, url: &str, source: Option<String>) -> Result<ExitCode> {
    let entries = config.source_entries();
    let source_config = match source {
        Some(id) => entries
            .into_iter()
            .find(|entry| entry.config.id == id)
            .map(|entry| entry.config)
            .with_context(|| format!("unknown source '{id}'"))?,
        None => entries
            .into_iter()
            .map(|entry| entry.config)
            .find(|candidate| url.starts_with(&candidate.base_url))
            .unwrap_or_else(|| adhoc_source(config, url)),
    };

    let context = config.context();
    let decision = context.gateway.evaluate(url, &source_config).await;
    print!("{}", render_decision(&decision));
    Ok(if decision.allowed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn adhoc_source(config: &AppConfig, url: &str) -> SourceConfig {
    let mut source = SourceConfig::new("adhoc", url);
    if let Some(agent) = config.user_agent.as_ref() {
        source.user_agent = agent.clone();
    }
    source
}

/// Orchestrator shared by the queue worker.
fn build_orchestrator(config: &AppConfig) -> Result<Arc<MultiSourceOrchestrator>> {
    let context = config.context();
    Ok(Arc::new(context.orchestrator(&config.source_entries())?))
}
