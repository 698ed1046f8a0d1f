use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use engine_logging::{engine_info, engine_warn};
use planning_core::{throughput, Record, RunStats, RunStatus};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::batch::{process_batch, BatchOptions, BatchProgress};
use crate::progress::ProgressSink;
use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY};
use crate::source::Source;
use crate::types::{EngineEvent, ScrapeError, Stage};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub source_id: String,
    pub status: RunStatus,
    pub record_count: usize,
    pub pages_discovered: u32,
    pub pages_processed: usize,
    pub error_count: usize,
    /// Pages the compliance gateway refused.
    pub policy_rejections: usize,
    /// Alternatives suggested by those refusals, deduplicated.
    pub alternatives: Vec<String>,
    pub duration_seconds: f64,
    pub throughput: f64,
    pub stats: RunStats,
    /// One line per failed or refused page, in page order.
    pub failures: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SourceRun {
    pub summary: SourceSummary,
    pub records: Vec<Record>,
}

/// Drives one source: discovery, paginated fetch, flatten, summary.
pub struct SourceRunner {
    source: Arc<dyn Source>,
    base_delay: Duration,
    jitter: bool,
}

impl SourceRunner {
    pub fn new(source: Arc<dyn Source>) -> Self {
        Self {
            source,
            base_delay: DEFAULT_BASE_DELAY,
            jitter: true,
        }
    }

    /// Override the backoff base (and disable jitter), mostly for tests.
    pub fn with_backoff(mut self, base_delay: Duration, jitter: bool) -> Self {
        self.base_delay = base_delay;
        self.jitter = jitter;
        self
    }

    pub fn source_id(&self) -> &str {
        self.source.id()
    }

    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    fn options(&self, concurrency: usize) -> BatchOptions {
        let mut retry = RetryPolicy::new(self.source.config().max_retries, self.base_delay);
        retry.jitter = self.jitter;
        BatchOptions::new(concurrency, retry)
    }

    /// Full run. Discovery failures (including a compliance block) fail the
    /// source; page failures are logged and counted but never abort it.
    /// Pages the gateway refuses are reported as policy rejections, not errors.
    pub async fn run(
        &self,
        from_date: NaiveDate,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<SourceRun, ScrapeError> {
        let started = Instant::now();
        let source_id = self.source.id().to_string();
        let mut stats = RunStats::new();

        if cancel.is_cancelled() {
            stats.finish(started.elapsed());
            return Ok(SourceRun {
                summary: summarize(&source_id, 0, &stats, PageReport::default(), 0, true),
                records: Vec::new(),
            });
        }

        engine_info!("{}: discovering pages since {}", source_id, from_date);
        sink.emit(EngineEvent::Progress {
            source_id: source_id.clone(),
            stage: Stage::Discovering,
            progress: BatchProgress::new(0, 1, 0, 0),
        });
        let discovered = self.source.discover_page_count(from_date).await?;
        let pages = clamp_pages(&source_id, discovered, self.source.config().max_pages);
        engine_info!("{}: {} result pages", source_id, pages);

        let source = self.source.as_ref();
        let options = self.options(source.config().page_concurrency);
        let result = process_batch(
            (1..=pages).collect(),
            move |_, page: u32| source.fetch_page(from_date, page),
            &options,
            cancel,
            |progress| {
                sink.emit(EngineEvent::Progress {
                    source_id: source_id.clone(),
                    stage: Stage::Pages,
                    progress,
                })
            },
        )
        .await;

        let mut report = PageReport::default();
        for (index, err) in &result.failures {
            if matches!(err, ScrapeError::Cancelled) {
                continue;
            }
            if err.is_policy_rejection() {
                engine_warn!("{}: page {} refused by policy: {}", source_id, index + 1, err);
                stats.record_blocked_page();
                for alternative in err.alternatives() {
                    if !report.alternatives.contains(&alternative) {
                        report.alternatives.push(alternative);
                    }
                }
            } else {
                engine_warn!("{}: page {} failed: {}", source_id, index + 1, err);
                stats.record_page(false);
            }
            report.failures.push(format!("page {}: {}", index + 1, err));
        }

        let mut records = Vec::new();
        for (_, rows) in &result.successes {
            stats.record_page(true);
            let normalized = self.source.normalize_rows(rows);
            stats.record_items(normalized.len(), 0);
            stats.record_discarded(rows.len() - normalized.len());
            records.extend(normalized);
        }

        if self.source.config().fetch_details && !records.is_empty() && !cancel.is_cancelled() {
            records = self.replace_with_details(records, cancel, sink).await;
        }

        stats.finish(started.elapsed());
        let summary = summarize(
            &source_id,
            records.len(),
            &stats,
            report,
            pages,
            cancel.is_cancelled(),
        );
        engine_info!(
            "{}: {} records from {}/{} pages in {:.1}s ({:.2} rec/s, {} errors, {} refused)",
            source_id,
            summary.record_count,
            summary.pages_processed,
            pages,
            summary.duration_seconds,
            summary.throughput,
            summary.error_count,
            summary.policy_rejections
        );
        sink.emit(EngineEvent::SourceCompleted(summary.clone()));
        Ok(SourceRun { summary, records })
    }

    /// Swap listing records for their detail pages. A record whose detail
    /// fails keeps its listing version.
    async fn replace_with_details(
        &self,
        records: Vec<Record>,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Vec<Record> {
        let references = records.iter().map(|r| r.reference.clone()).collect();
        let (details, stats) = self.enrich(references, cancel, sink).await;
        engine_info!(
            "{}: {} of {} details fetched",
            self.source.id(),
            stats.items_succeeded,
            records.len()
        );
        let mut details: HashMap<String, Record> =
            details.into_iter().map(|r| (r.key.clone(), r)).collect();
        records
            .into_iter()
            .map(|record| details.remove(&record.key).unwrap_or(record))
            .collect()
    }

    /// Fetch full records for `references` at the detail concurrency. Failed
    /// or unparseable details are dropped.
    pub async fn enrich(
        &self,
        references: Vec<String>,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> (Vec<Record>, RunStats) {
        let started = Instant::now();
        let source_id = self.source.id().to_string();
        let source = self.source.as_ref();
        let options = self.options(source.config().detail_concurrency);

        let result = process_batch(
            references,
            move |_, reference: String| async move { source.fetch_detail(&reference).await },
            &options,
            cancel,
            |progress| {
                sink.emit(EngineEvent::Progress {
                    source_id: source_id.clone(),
                    stage: Stage::Details,
                    progress,
                })
            },
        )
        .await;

        let mut stats = RunStats::new();
        let failed = result.failed();
        for (index, err) in &result.failures {
            if !matches!(err, ScrapeError::Cancelled) {
                engine_warn!("{}: detail {} dropped: {}", source_id, index + 1, err);
            }
        }
        let fetched = result.successes.len();
        let records: Vec<Record> = result.into_values().into_iter().flatten().collect();
        stats.record_items(records.len(), failed + (fetched - records.len()));
        stats.finish(started.elapsed());
        (records, stats)
    }
}

/// Page outcomes that did not produce rows.
#[derive(Debug, Default)]
struct PageReport {
    failures: Vec<String>,
    alternatives: Vec<String>,
}

fn clamp_pages(source_id: &str, discovered: u32, max_pages: u32) -> u32 {
    let max_pages = max_pages.max(1);
    if discovered > max_pages {
        engine_warn!(
            "{}: portal reports {} pages, fetching the first {}",
            source_id,
            discovered,
            max_pages
        );
        max_pages
    } else {
        discovered
    }
}

/// Blocked pages never make a run partial. A run where every settled page
/// was blocked has nothing to show and fails.
fn classify(stats: &RunStats, cancelled: bool) -> RunStatus {
    if !cancelled && stats.pages_processed == 0 && stats.pages_blocked > 0 {
        RunStatus::Failed
    } else {
        RunStatus::classify(stats.pages_processed, stats.pages_failed, cancelled)
    }
}

fn summarize(
    source_id: &str,
    record_count: usize,
    stats: &RunStats,
    pages: PageReport,
    pages_discovered: u32,
    cancelled: bool,
) -> SourceSummary {
    SourceSummary {
        source_id: source_id.to_string(),
        status: classify(stats, cancelled),
        record_count,
        pages_discovered,
        pages_processed: stats.pages_processed,
        error_count: stats.error_count(),
        policy_rejections: stats.pages_blocked,
        alternatives: pages.alternatives,
        duration_seconds: stats.duration.as_secs_f64(),
        throughput: throughput(record_count, stats.duration),
        stats: stats.clone(),
        failures: pages.failures,
    }
}
