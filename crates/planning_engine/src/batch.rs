use std::future::Future;

use engine_logging::engine_debug;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::retry::RetryPolicy;
use crate::types::ScrapeError;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    /// Upper bound on unresolved worker invocations.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl BatchOptions {
    pub fn new(concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            concurrency: concurrency.max(1),
            retry,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub percentage: f64,
}

impl BatchProgress {
    /// An empty batch counts as complete.
    pub fn new(completed: usize, total: usize, success_count: usize, error_count: usize) -> Self {
        let percentage = if total == 0 {
            100.0
        } else {
            completed as f64 * 100.0 / total as f64
        };
        Self {
            completed,
            total,
            success_count,
            error_count,
            percentage,
        }
    }
}

/// Every input index lands in exactly one of the two lists, both sorted by index.
#[derive(Debug)]
pub struct BatchResult<T> {
    pub successes: Vec<(usize, T)>,
    pub failures: Vec<(usize, ScrapeError)>,
}

impl<T> BatchResult<T> {
    pub fn len(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items never dispatched because the run was cancelled.
    pub fn cancelled(&self) -> usize {
        self.failures
            .iter()
            .filter(|(_, err)| matches!(err, ScrapeError::Cancelled))
            .count()
    }

    /// Worker failures, excluding cancelled items.
    pub fn failed(&self) -> usize {
        self.failures.len() - self.cancelled()
    }

    pub fn into_values(self) -> Vec<T> {
        self.successes.into_iter().map(|(_, value)| value).collect()
    }
}

/// Run `worker` over `items` with at most `options.concurrency` invocations in
/// flight, each wrapped by `options.retry`.
///
/// Items are dispatched in input order. `cancel` is polled before every
/// dispatch: once it fires, running invocations finish but nothing new starts,
/// and the undispatched items are reported as [`ScrapeError::Cancelled`].
/// `on_progress` fires once per settled item.
pub async fn process_batch<I, T, W, Fut, P>(
    items: Vec<I>,
    worker: W,
    options: &BatchOptions,
    cancel: &CancellationToken,
    mut on_progress: P,
) -> BatchResult<T>
where
    I: Clone,
    W: Fn(usize, I) -> Fut,
    Fut: Future<Output = Result<T, ScrapeError>>,
    P: FnMut(BatchProgress),
{
    let total = items.len();
    let concurrency = options.concurrency.max(1);
    let worker = &worker;
    let retry = &options.retry;

    let mut pending = items.into_iter().enumerate();
    let mut in_flight = FuturesUnordered::new();
    let mut successes = Vec::with_capacity(total);
    let mut failures = Vec::new();

    loop {
        while in_flight.len() < concurrency && !cancel.is_cancelled() {
            let Some((index, item)) = pending.next() else {
                break;
            };
            engine_debug!("batch dispatch item {}/{}", index + 1, total);
            in_flight.push(async move {
                let result = retry.run(|_| worker(index, item.clone())).await;
                (index, result)
            });
        }

        let Some((index, result)) = in_flight.next().await else {
            break;
        };
        match result {
            Ok(value) => successes.push((index, value)),
            Err(err) => {
                engine_debug!("batch item {} failed: {}", index + 1, err);
                failures.push((index, err));
            }
        }

        let completed = successes.len() + failures.len();
        on_progress(BatchProgress::new(
            completed,
            total,
            successes.len(),
            failures.len(),
        ));
    }

    for (index, _) in pending {
        failures.push((index, ScrapeError::Cancelled));
    }

    successes.sort_by_key(|(index, _)| *index);
    failures.sort_by_key(|(index, _)| *index);
    BatchResult {
        successes,
        failures,
    }
}
