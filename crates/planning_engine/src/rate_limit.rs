//! Request throttles shared by every task scraping one source.
//!
//! Both limiters keep their state behind an async mutex; a caller that has to
//! wait holds the lock while sleeping, so later callers queue behind it and
//! can never be admitted early.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    /// Suspend until one request may be dispatched.
    async fn acquire(&self);

    /// Steady-state requests per second this limiter admits.
    fn rate(&self) -> f64;

    /// Change the steady-state rate. Applies from the next grant on.
    fn set_rate(&self, requests_per_second: f64);
}

/// An `f64` rate readable without taking the limiter's lock.
#[derive(Debug)]
struct SharedRate(AtomicU64);

impl SharedRate {
    fn new(rate: f64) -> Self {
        Self(AtomicU64::new(sanitize_rate(rate).to_bits()))
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn set(&self, rate: f64) {
        self.0.store(sanitize_rate(rate).to_bits(), Ordering::Release);
    }
}

/// Admits one request every `1/R` seconds.
#[derive(Debug)]
pub struct FixedRateLimiter {
    rate: SharedRate,
    last_grant: Mutex<Option<Instant>>,
}

impl FixedRateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        Self {
            rate: SharedRate::new(requests_per_second),
            last_grant: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate.get())
    }
}

#[async_trait::async_trait]
impl RateLimiter for FixedRateLimiter {
    async fn acquire(&self) {
        let mut last = self.last_grant.lock().await;
        if let Some(previous) = *last {
            let interval = self.interval();
            let elapsed = previous.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn rate(&self) -> f64 {
        self.rate.get()
    }

    fn set_rate(&self, requests_per_second: f64) {
        self.rate.set(requests_per_second);
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: bursts of up to `capacity`, refilled at `refill_per_second`.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_per_second: SharedRate,
    state: Mutex<BucketState>,
}

impl TokenBucketLimiter {
    /// Starts full.
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_second: SharedRate::new(refill_per_second),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Tokens currently available, after a lazy refill.
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_second.get()).min(self.capacity);
        state.last_refill = now;
    }
}

#[async_trait::async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn acquire(&self) {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        if state.tokens < 1.0 {
            let missing = 1.0 - state.tokens;
            let wait = Duration::from_secs_f64(missing / self.refill_per_second.get());
            tokio::time::sleep(wait).await;
            self.refill(&mut state);
            // Float rounding can leave us a hair short after the exact wait.
            state.tokens = state.tokens.max(1.0);
        }
        state.tokens -= 1.0;
    }

    fn rate(&self) -> f64 {
        self.refill_per_second.get()
    }

    /// Tokens already accrued are kept; only the refill speed changes.
    fn set_rate(&self, requests_per_second: f64) {
        self.refill_per_second.set(requests_per_second);
    }
}

fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        1.0
    }
}
