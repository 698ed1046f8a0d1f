use std::fmt::Write as _;

use engine_logging::{engine_debug, engine_info, engine_warn};
use planning_engine::{AggregateReport, ComplianceDecision, EngineEvent, ProgressSink};

/// Progress goes to the log; the final report goes to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn emit(&self, event: EngineEvent) {
        match event {
            EngineEvent::Progress {
                source_id,
                stage,
                progress,
            } => engine_debug!(
                "{} {:?}: {}/{} ({:.0}%, {} errors)",
                source_id,
                stage,
                progress.completed,
                progress.total,
                progress.percentage,
                progress.error_count
            ),
            EngineEvent::SourceCompleted(summary) => engine_info!(
                "{} finished {:?}: {} records from {}/{} pages in {:.1}s ({} refused)",
                summary.source_id,
                summary.status,
                summary.record_count,
                summary.pages_processed,
                summary.pages_discovered,
                summary.duration_seconds,
                summary.policy_rejections
            ),
            EngineEvent::RunCompleted(report) => engine_info!(
                "run finished {:?}: {} records",
                report.status,
                report.total_records
            ),
            EngineEvent::RunRejected { reason } => engine_warn!("run rejected: {}", reason),
        }
    }
}

pub fn render_report(report: &AggregateReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "status: {:?}  records: {}  sources ok/failed/cancelled: {}/{}/{}  {:.1}s ({:.1} records/s)",
        report.status,
        report.total_records,
        report.successful_sources,
        report.failed_sources,
        report.cancelled_sources,
        report.duration_seconds,
        report.throughput
    );
    for outcome in &report.sources {
        let _ = write!(
            out,
            "  {:<24} {:<10} {:>6} records",
            outcome.source_id,
            format!("{:?}", outcome.status).to_lowercase(),
            outcome.record_count
        );
        if let Some(error) = outcome.error.as_ref() {
            let _ = write!(out, "  error: {error}");
        }
        if outcome.policy_rejection && !outcome.alternatives.is_empty() {
            let _ = write!(out, "  try: {}", outcome.alternatives.join(", "));
        }
        out.push('\n');
    }
    out
}

pub fn render_decision(decision: &ComplianceDecision) -> String {
    let mut out = String::new();
    let verdict = if decision.allowed { "allowed" } else { "blocked" };
    let _ = writeln!(
        out,
        "{}: {} via {:?}",
        decision.url, verdict, decision.method
    );
    if let Some(rate) = decision.effective_rate_limit {
        let _ = writeln!(out, "  rate limit: {rate} req/s");
    }
    for reason in &decision.reasons {
        let _ = writeln!(out, "  reason: {reason}");
    }
    for warning in &decision.warnings {
        let _ = writeln!(out, "  warning: {warning}");
    }
    if let Some(alternatives) = decision.alternatives.as_ref() {
        let _ = writeln!(out, "  alternatives: {}", alternatives.join(", "));
    }
    out
}
