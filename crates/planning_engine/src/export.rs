use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::fleet::AggregateReport;
use crate::persist::{AtomicFileWriter, PersistError};

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub report_filename: String,
    pub manifest_filename: Option<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            report_filename: "run-report.json".to_string(),
            manifest_filename: Some("manifest.json".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub report_path: PathBuf,
    pub manifest_path: Option<PathBuf>,
    /// Record files found next to the report.
    pub file_count: usize,
    pub record_count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug)]
struct RecordFile {
    source_id: String,
    filename: String,
    records: usize,
}

/// Write the aggregate report, plus a manifest of the `*.jsonl` record files
/// already in `output_dir`.
pub fn write_run_report(
    output_dir: &Path,
    report: &AggregateReport,
    options: ExportOptions,
) -> Result<ExportSummary, ExportError> {
    let writer = AtomicFileWriter::new(output_dir.to_path_buf());
    let report_path = writer.write(
        &options.report_filename,
        &serde_json::to_string_pretty(report)?,
    )?;

    let files = record_files(output_dir)?;
    let record_count = files.iter().map(|f| f.records).sum();

    let manifest_path = if let Some(name) = options.manifest_filename {
        let manifest = json!({
            "status": report.status,
            "total_records": record_count,
            "report": options.report_filename,
            "files": files.iter().map(|f| {
                json!({
                    "source_id": f.source_id,
                    "filename": f.filename,
                    "records": f.records,
                })
            }).collect::<Vec<_>>()
        });
        Some(writer.write(&name, &manifest.to_string())?)
    } else {
        None
    };

    Ok(ExportSummary {
        report_path,
        manifest_path,
        file_count: files.len(),
        record_count,
    })
}

fn record_files(output_dir: &Path) -> Result<Vec<RecordFile>, ExportError> {
    let mut entries: Vec<_> = fs::read_dir(output_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("jsonl"))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.path();
        let content = fs::read_to_string(&path)?;
        let source_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        files.push(RecordFile {
            source_id,
            filename: entry.file_name().to_string_lossy().into_owned(),
            records: content.lines().filter(|l| !l.trim().is_empty()).count(),
        });
    }
    Ok(files)
}
