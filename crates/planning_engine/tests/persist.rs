use std::fs;

use planning_core::{normalize_status, RawRow, Record, RunStats, RunStatus};
use planning_engine::{
    ensure_output_dir, invalidation_tags, write_run_report, AggregateReport, AtomicFileWriter,
    ExportOptions, JsonLinesSink, MemoryRecordSink, RecordSink,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn record(reference: &str) -> Record {
    let row = RawRow {
        reference: Some(reference.to_string()),
        address: Some("1 High Street".to_string()),
        status: Some("Approved".to_string()),
        ..RawRow::default()
    };
    Record::from_row(&row, "leeds", "https://example.org", normalize_status).unwrap()
}

#[test]
fn creates_missing_output_dir() {
    let temp = TempDir::new().unwrap();
    let new_dir = temp.path().join("out");
    assert!(!new_dir.exists());
    ensure_output_dir(&new_dir).unwrap();
    assert!(new_dir.is_dir());
}

#[test]
fn atomic_write_replaces_existing_and_is_atomic() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());

    let first = writer.write("leeds.jsonl", "hello").unwrap();
    assert_eq!(first.file_name().unwrap(), "leeds.jsonl");
    assert_eq!(fs::read_to_string(&first).unwrap(), "hello");

    // Replace existing
    let second = writer.write("leeds.jsonl", "world").unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read_to_string(&second).unwrap(), "world");
}

#[test]
fn no_partial_file_on_error() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("not_a_dir");
    fs::write(&file_path, "x").unwrap();

    let writer = AtomicFileWriter::new(file_path.clone());
    let result = writer.write("leeds.jsonl", "data");
    assert!(result.is_err());
    assert!(!file_path.with_file_name("leeds.jsonl").exists());
}

#[test]
fn json_lines_sink_writes_one_line_per_record() {
    let temp = TempDir::new().unwrap();
    let sink = JsonLinesSink::new(temp.path().to_path_buf());
    let records = vec![record("24/00001/FU"), record("24/00002/FU")];

    sink.store("leeds", &records).unwrap();

    let content = fs::read_to_string(temp.path().join("leeds.jsonl")).unwrap();
    let parsed: Vec<Record> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(parsed, records);
}

#[test]
fn json_lines_sink_replaces_previous_run() {
    let temp = TempDir::new().unwrap();
    let sink = JsonLinesSink::new(temp.path().to_path_buf());

    sink.store("leeds", &[record("A1"), record("A2")]).unwrap();
    sink.store("leeds", &[record("A3")]).unwrap();

    let content = fs::read_to_string(temp.path().join("leeds.jsonl")).unwrap();
    assert_eq!(content.lines().count(), 1);
    assert!(content.contains("\"A3\""));
}

#[test]
fn memory_sink_keeps_source_ids() {
    let sink = MemoryRecordSink::new();
    sink.store("leeds", &[record("A1")]).unwrap();
    sink.store("york", &[record("B1")]).unwrap();

    let ids: Vec<_> = sink
        .records()
        .into_iter()
        .map(|(source, record)| (source, record.reference))
        .collect();
    assert_eq!(
        ids,
        vec![
            ("leeds".to_string(), "A1".to_string()),
            ("york".to_string(), "B1".to_string())
        ]
    );
}

#[test]
fn invalidation_covers_source_and_latest_listing() {
    assert_eq!(
        invalidation_tags("leeds"),
        vec!["source:leeds".to_string(), "planning:latest".to_string()]
    );
}

#[test]
fn run_report_lists_record_files() {
    let temp = TempDir::new().unwrap();
    let sink = JsonLinesSink::new(temp.path().to_path_buf());
    sink.store("leeds", &[record("A1"), record("A2")]).unwrap();
    sink.store("york", &[record("B1")]).unwrap();

    let report = AggregateReport {
        status: RunStatus::Success,
        cancelled: false,
        total_records: 3,
        successful_sources: 2,
        failed_sources: 0,
        cancelled_sources: 0,
        policy_rejections: 0,
        sources: Vec::new(),
        duration_seconds: 1.5,
        throughput: 2.0,
        stats: RunStats::new(),
    };

    let summary = write_run_report(temp.path(), &report, ExportOptions::default()).unwrap();
    assert_eq!(summary.file_count, 2);
    assert_eq!(summary.record_count, 3);

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&summary.report_path).unwrap()).unwrap();
    assert_eq!(written["status"], "success");
    assert_eq!(written["total_records"], 3);

    let manifest_path = summary.manifest_path.unwrap();
    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(manifest_path).unwrap()).unwrap();
    assert_eq!(manifest["files"][0]["source_id"], "leeds");
    assert_eq!(manifest["files"][0]["records"], 2);
    assert_eq!(manifest["files"][1]["source_id"], "york");
}
