use std::sync::Mutex;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_ETHICAL_SCORE: u8 = 80;

/// An outbound route (usually a proxy) with its policy score and track record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EgressPath {
    pub id: String,
    pub proxy_url: String,
    /// 0-100; paths under the pool threshold are never selected.
    pub ethical_score: u8,
    #[serde(default)]
    pub successes: u64,
    #[serde(default)]
    pub failures: u64,
}

impl EgressPath {
    /// Laplace-smoothed, so untried paths start at 0.5 instead of 0 or 1.
    pub fn success_rate(&self) -> f64 {
        (self.successes as f64 + 1.0) / ((self.successes + self.failures) as f64 + 2.0)
    }
}

#[derive(Debug)]
pub struct EgressPool {
    min_ethical_score: u8,
    paths: Mutex<Vec<EgressPath>>,
}

impl EgressPool {
    pub fn new(paths: Vec<EgressPath>, min_ethical_score: u8) -> Self {
        Self {
            min_ethical_score,
            paths: Mutex::new(paths),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn min_ethical_score(&self) -> u8 {
        self.min_ethical_score
    }

    /// Best eligible path by success rate; ties keep pool order.
    pub fn select(&self) -> Option<EgressPath> {
        let paths = self.lock();
        let mut best: Option<&EgressPath> = None;
        for path in paths
            .iter()
            .filter(|path| path.ethical_score >= self.min_ethical_score)
        {
            if best.map_or(true, |current| path.success_rate() > current.success_rate()) {
                best = Some(path);
            }
        }
        best.cloned()
    }

    pub fn record_outcome(&self, id: &str, success: bool) {
        if let Some(path) = self.lock().iter_mut().find(|path| path.id == id) {
            if success {
                path.successes += 1;
            } else {
                path.failures += 1;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<EgressPath>> {
        self.paths
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
