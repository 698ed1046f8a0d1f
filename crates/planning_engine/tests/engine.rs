mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{date, rows, RecordingInvalidator, ScriptedSource};
use planning_core::RunStatus;
use planning_engine::{
    AggregateReport, EngineEvent, EngineHandle, MemoryRecordSink, MultiSourceOrchestrator,
    SourceRunner, Stage,
};

fn handle(sources: Vec<ScriptedSource>) -> EngineHandle {
    let runners = sources
        .into_iter()
        .map(|source| SourceRunner::new(Arc::new(source)))
        .collect();
    let orchestrator = MultiSourceOrchestrator::new(
        runners,
        Arc::new(MemoryRecordSink::new()),
        Arc::new(RecordingInvalidator::default()),
    );
    EngineHandle::new(Arc::new(orchestrator))
}

/// Drain events until a run finishes one way or the other.
fn wait_for_outcome(handle: &EngineHandle) -> (Vec<EngineEvent>, Result<AggregateReport, String>) {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        match handle.recv_timeout(Duration::from_millis(100)) {
            Some(EngineEvent::RunCompleted(report)) => return (seen, Ok(report)),
            Some(EngineEvent::RunRejected { reason }) => return (seen, Err(reason)),
            Some(other) => seen.push(other),
            None => {}
        }
    }
    panic!("engine produced no outcome in time");
}

#[test]
fn queued_jobs_run_in_order() {
    let handle = handle(vec![
        ScriptedSource::new("b", vec![rows("B", 5)]),
        ScriptedSource::new("c", vec![rows("C", 4), rows("C2", 3)]),
    ]);

    handle.run_source("b", date("2024-03-01"));
    handle.run_all(date("2024-03-01"));

    let (events, first) = wait_for_outcome(&handle);
    let first = first.unwrap();
    assert_eq!(first.sources.len(), 1);
    assert_eq!(first.total_records, 5);
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Progress { source_id, stage: Stage::Pages, .. } if source_id == "b"
    )));

    // Queued behind the first job rather than rejected as already running.
    let (_, second) = wait_for_outcome(&handle);
    let second = second.unwrap();
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(second.total_records, 12);
}

#[test]
fn unknown_source_is_rejected() {
    let handle = handle(vec![ScriptedSource::new("b", vec![rows("B", 1)])]);
    handle.run_source("nowhere", date("2024-03-01"));

    let (_, outcome) = wait_for_outcome(&handle);
    let reason = outcome.unwrap_err();
    assert!(reason.contains("nowhere"));
}

#[test]
fn cancel_stops_the_active_run() {
    let handle = handle(vec![ScriptedSource::new(
        "slow",
        (0..20).map(|n| rows(&format!("S{n}"), 1)).collect(),
    )
    .with_delay(Duration::from_millis(50))
    .with_page_concurrency(1)]);

    handle.run_all(date("2024-03-01"));
    std::thread::sleep(Duration::from_millis(120));
    handle.canceller().cancel();

    let (_, outcome) = wait_for_outcome(&handle);
    let report = outcome.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(report.total_records < 20);
}
