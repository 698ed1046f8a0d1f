use std::future::Future;
use std::time::Duration;

use engine_logging::{engine_debug, engine_warn};
use rand::Rng;

use crate::fetch::{FetchRequest, Fetcher};
use crate::types::{FetchOutput, ScrapeError};

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
/// A server-requested wait is honoured up to `max_delay` times this factor.
pub const RETRY_AFTER_CAP_FACTOR: u32 = 4;

/// Exponential backoff shared by single requests and batch items.
///
/// Attempt `n` (0-based) that fails with a retryable error waits
/// `base_delay * 2^n`, capped at `max_delay`, before attempt `n + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Scale each delay by a random factor in `[0.5, 1.0]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before the attempt following failed attempt `attempt`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn delay_for(&self, attempt: u32, err: &ScrapeError) -> Duration {
        let mut delay = self.backoff(attempt);
        if self.jitter && !delay.is_zero() {
            let scale = rand::rng().random_range(0.5..=1.0);
            delay = delay.mul_f64(scale);
        }
        match err.retry_after() {
            Some(requested) => delay.max(self.clamp_retry_after(requested)),
            None => delay,
        }
    }

    /// Longest server-requested wait this policy will sit through.
    pub fn retry_after_cap(&self) -> Duration {
        self.max_delay.saturating_mul(RETRY_AFTER_CAP_FACTOR)
    }

    fn clamp_retry_after(&self, requested: Duration) -> Duration {
        let cap = self.retry_after_cap();
        if requested > cap {
            engine_warn!("Retry-After of {:?} clamped to {:?}", requested, cap);
            cap
        } else {
            requested
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ScrapeError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ScrapeError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt, &err);
                    engine_debug!(
                        "attempt {}/{} failed ({}); retrying in {:?}",
                        attempt + 1,
                        self.max_attempts(),
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        engine_warn!(
                            "giving up after {} attempts: {}",
                            self.max_attempts(),
                            err
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// Single-request helper: one GET under `policy`.
pub async fn fetch_with_retry(
    fetcher: &dyn Fetcher,
    request: &FetchRequest,
    policy: &RetryPolicy,
) -> Result<FetchOutput, ScrapeError> {
    policy
        .run(|_| async { fetcher.fetch(request).await.map_err(ScrapeError::from) })
        .await
}
