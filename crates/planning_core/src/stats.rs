use std::time::Duration;

use serde::Serialize;

/// Counters for one run (a single source or the whole fleet).
///
/// Only ever increases until [`RunStats::finish`] freezes the duration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub items_processed: usize,
    pub items_succeeded: usize,
    pub items_failed: usize,
    pub pages_processed: usize,
    pub pages_failed: usize,
    /// Pages the compliance gateway refused. A policy outcome, not an error.
    pub pages_blocked: usize,
    /// Rows dropped during normalization (no reference). Not errors.
    pub rows_discarded: usize,
    pub duration: Duration,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_page(&mut self, succeeded: bool) {
        if succeeded {
            self.pages_processed += 1;
        } else {
            self.pages_failed += 1;
        }
    }

    pub fn record_blocked_page(&mut self) {
        self.pages_blocked += 1;
    }

    pub fn record_items(&mut self, succeeded: usize, failed: usize) {
        self.items_processed += succeeded + failed;
        self.items_succeeded += succeeded;
        self.items_failed += failed;
    }

    pub fn record_discarded(&mut self, rows: usize) {
        self.rows_discarded += rows;
    }

    pub fn finish(&mut self, elapsed: Duration) {
        self.duration = elapsed;
    }

    pub fn merge(&mut self, other: &RunStats) {
        self.items_processed += other.items_processed;
        self.items_succeeded += other.items_succeeded;
        self.items_failed += other.items_failed;
        self.pages_processed += other.pages_processed;
        self.pages_failed += other.pages_failed;
        self.pages_blocked += other.pages_blocked;
        self.rows_discarded += other.rows_discarded;
    }

    pub fn error_count(&self) -> usize {
        self.items_failed + self.pages_failed
    }
}

/// Records per second; zero for an instantaneous run.
pub fn throughput(records: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        0.0
    } else {
        records as f64 / secs
    }
}

/// Final classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Classify from settled work counts. Cancellation wins over everything.
    pub fn classify(succeeded: usize, failed: usize, cancelled: bool) -> Self {
        if cancelled {
            RunStatus::Cancelled
        } else if failed == 0 {
            RunStatus::Success
        } else if succeeded == 0 {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failed => 1,
            RunStatus::Partial => 2,
            RunStatus::Cancelled => 130,
        }
    }
}
