use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use engine_logging::engine_info;
use planning_core::Record;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    // Must be writable: try creating a temp file.
    NamedTempFile::new_in(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    Ok(())
}

/// Atomically write content to `{dir}/{filename}` by writing a temp file then renaming.
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn write(&self, filename: &str, content: &str) -> Result<PathBuf, PersistError> {
        ensure_output_dir(&self.dir)?;

        let target = self.dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        if target.exists() {
            fs::remove_file(&target)?;
        }
        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }
}

/// Receives normalized records once a source run finishes.
pub trait RecordSink: Send + Sync {
    fn store(&self, source_id: &str, records: &[Record]) -> Result<(), PersistError>;
}

/// Signalled after a source's records were stored, so cached pages can be rebuilt.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, tags: &[String]);
}

/// One `{source_id}.jsonl` per source, replaced atomically on every run.
pub struct JsonLinesSink {
    writer: AtomicFileWriter,
}

impl JsonLinesSink {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            writer: AtomicFileWriter::new(dir),
        }
    }
}

impl RecordSink for JsonLinesSink {
    fn store(&self, source_id: &str, records: &[Record]) -> Result<(), PersistError> {
        let mut content = String::new();
        for record in records {
            content.push_str(&serde_json::to_string(record)?);
            content.push('\n');
        }
        let path = self.writer.write(&format!("{source_id}.jsonl"), &content)?;
        engine_info!("stored {} records at {:?}", records.len(), path);
        Ok(())
    }
}

/// Keeps everything in memory; handy for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryRecordSink {
    stored: Mutex<Vec<(String, Record)>>,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(String, Record)> {
        self.stored
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl RecordSink for MemoryRecordSink {
    fn store(&self, source_id: &str, records: &[Record]) -> Result<(), PersistError> {
        self.stored
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(records.iter().map(|r| (source_id.to_string(), r.clone())));
        Ok(())
    }
}

/// Logs the tags; the real cache lives elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInvalidator;

impl CacheInvalidator for LoggingInvalidator {
    fn invalidate(&self, tags: &[String]) {
        engine_info!("cache invalidation requested for tags {:?}", tags);
    }
}

/// Tags to invalidate after `source_id` was refreshed.
pub fn invalidation_tags(source_id: &str) -> Vec<String> {
    vec![
        format!("source:{source_id}"),
        "planning:latest".to_string(),
    ]
}
