//! Fan-out across every registered source.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::NaiveDate;
use engine_logging::{engine_error, engine_info, engine_warn};
use futures_util::FutureExt;
use planning_core::{throughput, Record, RunStats, RunStatus};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::batch::BatchProgress;
use crate::orchestrator::{SourceRunner, SourceSummary};
use crate::persist::{invalidation_tags, CacheInvalidator, RecordSink};
use crate::progress::ProgressSink;
use crate::types::{EngineEvent, ScrapeError, Stage};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceOutcome {
    pub source_id: String,
    pub status: RunStatus,
    pub record_count: usize,
    pub duration_seconds: f64,
    pub summary: Option<SourceSummary>,
    pub error: Option<String>,
    /// Refused by the compliance gateway rather than failing technically.
    pub policy_rejection: bool,
    pub alternatives: Vec<String>,
}

impl SourceOutcome {
    fn failed(source_id: &str, err: &ScrapeError) -> Self {
        Self {
            source_id: source_id.to_string(),
            status: RunStatus::Failed,
            record_count: 0,
            duration_seconds: 0.0,
            summary: None,
            error: Some(err.to_string()),
            policy_rejection: err.is_policy_rejection(),
            alternatives: err.alternatives(),
        }
    }

    fn from_summary(summary: SourceSummary) -> Self {
        Self {
            source_id: summary.source_id.clone(),
            status: summary.status,
            record_count: summary.record_count,
            duration_seconds: summary.duration_seconds,
            error: None,
            policy_rejection: summary.policy_rejections > 0,
            alternatives: summary.alternatives.clone(),
            summary: Some(summary),
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, RunStatus::Success | RunStatus::Partial)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    pub status: RunStatus,
    pub cancelled: bool,
    pub total_records: usize,
    pub successful_sources: usize,
    pub failed_sources: usize,
    pub cancelled_sources: usize,
    pub policy_rejections: usize,
    /// Registry order.
    pub sources: Vec<SourceOutcome>,
    pub duration_seconds: f64,
    pub throughput: f64,
    pub stats: RunStats,
}

impl AggregateReport {
    fn build(sources: Vec<SourceOutcome>, cancelled: bool, started: Instant) -> Self {
        let elapsed = started.elapsed();
        let mut stats = RunStats::new();
        for summary in sources.iter().filter_map(|outcome| outcome.summary.as_ref()) {
            stats.merge(&summary.stats);
        }
        stats.finish(elapsed);

        let successful_sources = sources.iter().filter(|o| o.succeeded()).count();
        let failed_sources = sources
            .iter()
            .filter(|o| o.status == RunStatus::Failed)
            .count();
        let cancelled_sources = sources
            .iter()
            .filter(|o| o.status == RunStatus::Cancelled)
            .count();
        let total_records = sources.iter().map(|o| o.record_count).sum();
        // A partial source still counts against a clean run.
        let degraded = failed_sources
            + sources
                .iter()
                .filter(|o| o.status == RunStatus::Partial)
                .count();
        let status = if cancelled {
            RunStatus::Cancelled
        } else if degraded > 0 && successful_sources > 0 {
            RunStatus::Partial
        } else {
            RunStatus::classify(successful_sources, failed_sources, false)
        };

        Self {
            status,
            cancelled,
            total_records,
            successful_sources,
            failed_sources,
            cancelled_sources,
            policy_rejections: sources.iter().filter(|o| o.policy_rejection).count(),
            sources,
            duration_seconds: elapsed.as_secs_f64(),
            throughput: throughput(total_records, elapsed),
            stats,
        }
    }
}

/// Releases the single-flight flag when the run ends, however it ends.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ScrapeError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ScrapeError::AlreadyRunning)?;
        Ok(Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct MultiSourceOrchestrator {
    runners: Vec<Arc<SourceRunner>>,
    records: Arc<dyn RecordSink>,
    invalidator: Arc<dyn CacheInvalidator>,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

impl MultiSourceOrchestrator {
    pub fn new(
        runners: Vec<SourceRunner>,
        records: Arc<dyn RecordSink>,
        invalidator: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            runners: runners.into_iter().map(Arc::new).collect(),
            records,
            invalidator,
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.runners
            .iter()
            .map(|runner| runner.source_id().to_string())
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the active run to stop dispatching. No-op when idle.
    pub fn cancel(&self) {
        if let Some(token) = self.lock_cancel().as_ref() {
            engine_warn!("cancellation requested");
            token.cancel();
        }
    }

    pub async fn run_all(
        &self,
        from_date: NaiveDate,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<AggregateReport, ScrapeError> {
        let runners = self.runners.clone();
        self.run_runners(runners, from_date, progress).await
    }

    pub async fn run_source(
        &self,
        source_id: &str,
        from_date: NaiveDate,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<AggregateReport, ScrapeError> {
        let runner = self
            .runners
            .iter()
            .find(|runner| runner.source_id() == source_id)
            .cloned()
            .ok_or_else(|| ScrapeError::UnknownSource(source_id.to_string()))?;
        self.run_runners(vec![runner], from_date, progress).await
    }

    async fn run_runners(
        &self,
        runners: Vec<Arc<SourceRunner>>,
        from_date: NaiveDate,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<AggregateReport, ScrapeError> {
        let _guard = RunGuard::acquire(&self.running)?;
        let token = CancellationToken::new();
        *self.lock_cancel() = Some(token.clone());
        let started = Instant::now();
        engine_info!("starting run over {} sources since {}", runners.len(), from_date);

        let mut set = JoinSet::new();
        for (position, runner) in runners.iter().enumerate() {
            let runner = runner.clone();
            let token = token.clone();
            let progress = progress.clone();
            let records = self.records.clone();
            let invalidator = self.invalidator.clone();
            set.spawn(async move {
                let run = AssertUnwindSafe(runner.run(from_date, &token, progress.as_ref()))
                    .catch_unwind()
                    .await;
                let outcome = match run {
                    Ok(Ok(run)) => {
                        let source_id = runner.source_id().to_string();
                        let summary = run.summary;
                        match persist_run(run.records, &source_id, records, invalidator, &*progress)
                            .await
                        {
                            Ok(()) => SourceOutcome::from_summary(summary),
                            Err(err) => SourceOutcome::failed(&source_id, &err),
                        }
                    }
                    Ok(Err(err)) => {
                        engine_warn!("{}: run failed: {}", runner.source_id(), err);
                        SourceOutcome::failed(runner.source_id(), &err)
                    }
                    Err(_) => {
                        engine_error!("{}: run panicked", runner.source_id());
                        SourceOutcome::failed(
                            runner.source_id(),
                            &ScrapeError::Parsing("source task panicked".to_string()),
                        )
                    }
                };
                (position, outcome)
            });
        }

        let mut outcomes: Vec<Option<SourceOutcome>> = vec![None; runners.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((position, outcome)) => outcomes[position] = Some(outcome),
                Err(err) => engine_error!("source task did not complete: {}", err),
            }
        }

        let sources = outcomes
            .into_iter()
            .zip(runners.iter())
            .map(|(outcome, runner)| {
                outcome.unwrap_or_else(|| {
                    SourceOutcome::failed(
                        runner.source_id(),
                        &ScrapeError::Parsing("source task aborted".to_string()),
                    )
                })
            })
            .collect();

        let report = AggregateReport::build(sources, token.is_cancelled(), started);
        *self.lock_cancel() = None;
        engine_info!(
            "run {:?}: {} records, {} ok / {} failed sources in {:.1}s",
            report.status,
            report.total_records,
            report.successful_sources,
            report.failed_sources,
            report.duration_seconds
        );
        progress.emit(EngineEvent::RunCompleted(report.clone()));
        Ok(report)
    }

    fn lock_cancel(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Store on the blocking pool so file I/O never stalls the async workers.
async fn persist_run(
    records: Vec<Record>,
    source_id: &str,
    sink: Arc<dyn RecordSink>,
    invalidator: Arc<dyn CacheInvalidator>,
    progress: &dyn ProgressSink,
) -> Result<(), ScrapeError> {
    let total = records.len();
    progress.emit(EngineEvent::Progress {
        source_id: source_id.to_string(),
        stage: Stage::Persisting,
        progress: BatchProgress::new(0, total, 0, 0),
    });

    let result = if records.is_empty() {
        Ok(())
    } else {
        let id = source_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), ScrapeError> {
            sink.store(&id, &records)
                .map_err(|err| ScrapeError::Persist(err.to_string()))?;
            invalidator.invalidate(&invalidation_tags(&id));
            Ok(())
        })
        .await
        .unwrap_or_else(|err| Err(ScrapeError::Persist(format!("store task failed: {err}"))))
    };

    let stored = if result.is_ok() { total } else { 0 };
    progress.emit(EngineEvent::Progress {
        source_id: source_id.to_string(),
        stage: Stage::Done,
        progress: BatchProgress::new(total, total, stored, total - stored),
    });
    result
}
