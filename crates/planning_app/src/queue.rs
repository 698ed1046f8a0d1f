//! Batch mode: jobs arrive on stdin and run one after another through the
//! engine's queue.

use std::io::{self, BufRead};
use std::process::ExitCode;
use std::thread;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use engine_logging::{engine_info, engine_warn};
use planning_core::RunStatus;
use planning_engine::{EngineCanceller, EngineCommand, EngineEvent, EngineHandle, ProgressSink};

use crate::config::AppConfig;
use crate::report::LogProgressSink;
use crate::{build_orchestrator, finish, status_code};

/// `all 2024-01-01` or `leeds 2024-01-01`; blank lines and `#` comments skip.
pub fn parse_job(line: &str) -> Result<Option<EngineCommand>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    let (Some(target), Some(date), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected '<source-id|all> <YYYY-MM-DD>', got '{line}'"));
    };
    let from_date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|err| format!("bad date '{date}': {err}"))?;
    Ok(Some(if target.eq_ignore_ascii_case("all") {
        EngineCommand::RunAll { from_date }
    } else {
        EngineCommand::RunSource {
            source_id: target.to_string(),
            from_date,
        }
    }))
}

/// Cancelled beats everything; otherwise any degraded job makes the batch partial.
pub fn overall_status(statuses: &[RunStatus]) -> RunStatus {
    if statuses.contains(&RunStatus::Cancelled) {
        return RunStatus::Cancelled;
    }
    let failed = statuses.iter().filter(|s| **s == RunStatus::Failed).count();
    let clean = statuses.iter().filter(|s| **s == RunStatus::Success).count();
    if clean == statuses.len() {
        RunStatus::Success
    } else if failed == statuses.len() {
        RunStatus::Failed
    } else {
        RunStatus::Partial
    }
}

pub fn run(config: &AppConfig) -> Result<ExitCode> {
    let mut jobs = Vec::new();
    for (number, line) in io::stdin().lock().lines().enumerate() {
        let line = line.context("reading jobs from stdin")?;
        match parse_job(&line) {
            Ok(Some(job)) => jobs.push(job),
            Ok(None) => {}
            Err(err) => engine_warn!("line {} skipped: {}", number + 1, err),
        }
    }
    if jobs.is_empty() {
        engine_warn!("no jobs on stdin");
        return Ok(ExitCode::SUCCESS);
    }

    let handle = EngineHandle::new(build_orchestrator(config)?);
    watch_interrupt(handle.canceller());
    let expected = jobs.len();
    for job in jobs {
        handle.enqueue(job);
    }
    engine_info!("{} jobs queued", expected);

    let mut statuses = Vec::with_capacity(expected);
    while statuses.len() < expected {
        let Some(event) = handle.recv() else {
            engine_warn!("engine stopped with {} jobs outstanding", expected - statuses.len());
            statuses.push(RunStatus::Failed);
            break;
        };
        match event {
            EngineEvent::RunCompleted(report) => {
                statuses.push(report.status);
                finish(config, &report);
            }
            EngineEvent::RunRejected { reason } => {
                eprintln!("job rejected: {reason}");
                statuses.push(RunStatus::Failed);
            }
            other => LogProgressSink.emit(other),
        }
    }
    Ok(status_code(overall_status(&statuses)))
}

/// Ctrl-C stops the active job; the rest of the queue still runs.
fn watch_interrupt(canceller: EngineCanceller) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                engine_warn!("interrupt handling unavailable: {}", err);
                return;
            }
        };
        runtime.block_on(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                engine_warn!("interrupt received, cancelling the active job");
                canceller.cancel();
            }
        });
    });
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn job_lines_parse() {
        assert_eq!(
            parse_job("all 2024-01-01"),
            Ok(Some(EngineCommand::RunAll {
                from_date: date(2024, 1, 1)
            }))
        );
        assert_eq!(
            parse_job("  leeds   2024-02-29 "),
            Ok(Some(EngineCommand::RunSource {
                source_id: "leeds".to_string(),
                from_date: date(2024, 2, 29)
            }))
        );
        assert_eq!(parse_job(""), Ok(None));
        assert_eq!(parse_job("# nightly"), Ok(None));
    }

    #[test]
    fn malformed_job_lines_are_errors() {
        assert!(parse_job("leeds").is_err());
        assert!(parse_job("leeds 2024-13-01").is_err());
        assert!(parse_job("leeds 2024-01-01 extra").is_err());
    }

    #[test]
    fn batch_status_combines_jobs() {
        use RunStatus::*;
        assert_eq!(overall_status(&[]), Success);
        assert_eq!(overall_status(&[Success, Success]), Success);
        assert_eq!(overall_status(&[Success, Partial]), Partial);
        assert_eq!(overall_status(&[Success, Failed]), Partial);
        assert_eq!(overall_status(&[Failed, Failed]), Failed);
        assert_eq!(overall_status(&[Success, Cancelled, Failed]), Cancelled);
    }
}
