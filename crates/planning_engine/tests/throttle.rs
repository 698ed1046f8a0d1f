use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use planning_engine::{
    process_batch, BatchOptions, BatchProgress, FailureKind, FetchError, FixedRateLimiter,
    RateLimiter, RetryPolicy, ScrapeError, TokenBucketLimiter,
};
use pretty_assertions::assert_eq;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn timeout_error() -> ScrapeError {
    ScrapeError::Network(FetchError::new(FailureKind::Timeout, "slow upstream"))
}

#[tokio::test(start_paused = true)]
async fn fixed_rate_spaces_requests_evenly() {
    let limiter = FixedRateLimiter::new(2.0);
    assert_eq!(limiter.interval(), Duration::from_millis(500));

    let start = Instant::now();
    let mut grants = Vec::new();
    for _ in 0..4 {
        limiter.acquire().await;
        grants.push(start.elapsed());
    }

    assert_eq!(grants[0], Duration::ZERO);
    for pair in grants.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(500));
    }
    assert!(start.elapsed() >= Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn fixed_rate_can_be_changed_between_grants() {
    let limiter = FixedRateLimiter::new(10.0);
    limiter.acquire().await;

    limiter.set_rate(0.5);
    assert_eq!(limiter.rate(), 0.5);
    assert_eq!(limiter.interval(), Duration::from_secs(2));
    let start = Instant::now();
    limiter.acquire().await;
    assert!(start.elapsed() >= Duration::from_millis(1900));

    limiter.set_rate(10.0);
    let start = Instant::now();
    limiter.acquire().await;
    assert!(start.elapsed() <= Duration::from_millis(100));

    // Nonsense rates fall back to one per second.
    limiter.set_rate(0.0);
    assert_eq!(limiter.rate(), 1.0);
}

#[tokio::test(start_paused = true)]
async fn fixed_rate_is_shared_between_tasks() {
    let limiter = Arc::new(FixedRateLimiter::new(4.0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            limiter.acquire().await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Eight grants at 4/s: the last one waits seven intervals.
    assert!(start.elapsed() >= Duration::from_millis(1750));
}

#[tokio::test(start_paused = true)]
async fn token_bucket_allows_burst_then_refills() {
    let limiter = TokenBucketLimiter::new(3, 1.0);
    let start = Instant::now();

    for _ in 0..3 {
        limiter.acquire().await;
    }
    assert!(start.elapsed() < Duration::from_millis(10));

    limiter.acquire().await;
    assert!(start.elapsed() >= Duration::from_secs(1));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(limiter.available().await, limiter.capacity());
}

#[test]
fn invalid_rates_fall_back_to_one_per_second() {
    assert_eq!(FixedRateLimiter::new(0.0).rate(), 1.0);
    assert_eq!(FixedRateLimiter::new(f64::NAN).rate(), 1.0);
    assert_eq!(TokenBucketLimiter::new(5, -2.0).rate(), 1.0);
}

#[test]
fn backoff_doubles_and_caps() {
    let policy = RetryPolicy {
        max_retries: 10,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        jitter: false,
    };
    assert_eq!(policy.backoff(0), Duration::from_millis(100));
    assert_eq!(policy.backoff(1), Duration::from_millis(200));
    assert_eq!(policy.backoff(3), Duration::from_millis(800));
    assert_eq!(policy.backoff(4), Duration::from_secs(1));
    assert_eq!(policy.backoff(40), Duration::from_secs(1));
    assert_eq!(policy.max_attempts(), 11);
}

#[tokio::test(start_paused = true)]
async fn retry_stops_after_budget() {
    let attempts = AtomicU32::new(0);
    let policy = RetryPolicy::new(2, Duration::from_millis(100)).without_jitter();

    let result: Result<(), ScrapeError> = policy
        .run(|_| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(timeout_error())
        })
        .await;

    assert!(matches!(result, Err(ScrapeError::Network(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_waits_exponentially() {
    let policy = RetryPolicy::new(3, Duration::from_millis(100)).without_jitter();
    let start = Instant::now();

    let value = policy
        .run(|attempt| async move {
            if attempt < 3 {
                Err(timeout_error())
            } else {
                Ok(attempt)
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 3);
    // 100 + 200 + 400
    assert!(start.elapsed() >= Duration::from_millis(700));
    assert!(start.elapsed() < Duration::from_millis(800));
}

#[tokio::test(start_paused = true)]
async fn retry_skips_non_retryable_errors() {
    let attempts = AtomicU32::new(0);
    let policy = RetryPolicy::new(5, Duration::from_millis(100));

    let result: Result<(), ScrapeError> = policy
        .run(|_| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ScrapeError::Parsing("no table".to_string()))
        })
        .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_honours_retry_after_as_minimum() {
    let policy = RetryPolicy::new(1, Duration::from_millis(10)).without_jitter();
    let start = Instant::now();

    let _ = policy
        .run(|attempt| async move {
            if attempt == 0 {
                Err(ScrapeError::RateLimited {
                    retry_after: Some(Duration::from_secs(5)),
                })
            } else {
                Ok(())
            }
        })
        .await;

    assert!(start.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn excessive_retry_after_is_clamped() {
    let policy = RetryPolicy {
        max_retries: 1,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_secs(1),
        jitter: false,
    };
    assert_eq!(policy.retry_after_cap(), Duration::from_secs(4));
    let start = Instant::now();

    let result = policy
        .run(|attempt| async move {
            if attempt == 0 {
                Err(ScrapeError::RateLimited {
                    retry_after: Some(Duration::from_secs(86_400)),
                })
            } else {
                Ok(())
            }
        })
        .await;

    assert!(result.is_ok());
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(4));
    assert!(waited < Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn batch_bounds_concurrency_and_keeps_input_order() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let options = BatchOptions::new(3, RetryPolicy::none());
    let start = Instant::now();

    let result = process_batch(
        (0..10u64).collect(),
        |_, item| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                // Later items finish first.
                tokio::time::sleep(Duration::from_millis(100 - item * 5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(item * 10)
            }
        },
        &options,
        &CancellationToken::new(),
        |_| {},
    )
    .await;

    assert_eq!(peak.load(Ordering::SeqCst), 3);
    assert!(result.failures.is_empty());
    assert_eq!(
        result.into_values(),
        vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90]
    );
    assert!(start.elapsed() < Duration::from_millis(400));
}

#[tokio::test(start_paused = true)]
async fn batch_settles_every_item_and_reports_progress() {
    let progress = Mutex::new(Vec::<BatchProgress>::new());
    let options = BatchOptions::new(2, RetryPolicy::none());

    let result = process_batch(
        vec!["a", "b", "c", "d", "e"],
        |index, item| async move {
            if index % 2 == 1 {
                Err(ScrapeError::Parsing(format!("bad row {item}")))
            } else {
                Ok(item.to_uppercase())
            }
        },
        &options,
        &CancellationToken::new(),
        |p| progress.lock().unwrap().push(p),
    )
    .await;

    assert_eq!(result.len(), 5);
    let ok: Vec<_> = result.successes.iter().map(|(i, _)| *i).collect();
    let failed: Vec<_> = result.failures.iter().map(|(i, _)| *i).collect();
    assert_eq!(ok, vec![0, 2, 4]);
    assert_eq!(failed, vec![1, 3]);
    assert_eq!(result.failed(), 2);

    let progress = progress.into_inner().unwrap();
    assert_eq!(progress.len(), 5);
    let last = progress.last().unwrap();
    assert_eq!(last.completed, 5);
    assert_eq!(last.success_count, 3);
    assert_eq!(last.error_count, 2);
    assert_eq!(last.percentage, 100.0);
    assert!(progress.windows(2).all(|w| w[0].completed < w[1].completed));
}

#[tokio::test(start_paused = true)]
async fn batch_retries_items_with_shared_policy() {
    let calls = Arc::new(AtomicU32::new(0));
    let retry = RetryPolicy::new(2, Duration::from_millis(10)).without_jitter();
    let options = BatchOptions::new(1, retry);

    let result = process_batch(
        vec![1u32],
        |_, _| {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(timeout_error())
                } else {
                    Ok("done")
                }
            }
        },
        &options,
        &CancellationToken::new(),
        |_| {},
    )
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.into_values(), vec!["done"]);
}

#[tokio::test(start_paused = true)]
async fn cancelled_batch_stops_dispatching() {
    let cancel = CancellationToken::new();
    let started = Arc::new(AtomicUsize::new(0));
    let options = BatchOptions::new(2, RetryPolicy::none());

    let result = process_batch(
        (0..6u32).collect(),
        |_, item| {
            let started = started.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(item)
            }
        },
        &options,
        &cancel,
        |_| cancel.cancel(),
    )
    .await;

    // The two in-flight items finish; nothing new starts.
    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(result.successes.len(), 2);
    assert_eq!(result.cancelled(), 4);
    assert_eq!(result.failed(), 0);
    assert_eq!(result.len(), 6);
}

#[test]
fn zero_concurrency_is_clamped() {
    assert_eq!(BatchOptions::new(0, RetryPolicy::none()).concurrency, 1);
}
