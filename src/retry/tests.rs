//! Integration tests for retry functionality.

use super::*;
use crate::transport::ApiError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn policy(max_retries: u32, initial_ms: u64, max_ms: u64) -> RetryPolicyBuilder {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .initial_delay_ms(initial_ms)
        .max_delay_ms(max_ms)
}

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_on_third_attempt() {
    let stats = Arc::new(RetryStatistics::new());
    let executor = RetryExecutor::new(policy(3, 100, 1_000).build().unwrap(), stats.clone());
    let calls = &AtomicU32::new(0);

    let result = executor
        .execute("GET /users", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ApiError::status(503, "/users", "GET"))
            } else {
                Ok("success")
            }
        })
        .await
        .unwrap();

    assert_eq!(result.value, "success");
    assert_eq!(result.attempts(), 3);
    assert_eq!(result.record.retries(), 2);
    assert_eq!(
        result.record.error_categories(),
        vec![ErrorCategory::ServerError, ErrorCategory::ServerError]
    );

    assert_eq!(stats.total_requests(), 1);
    assert_eq!(stats.requests_with_retries(), 1);
    assert_eq!(stats.successful_retries(), 1);
    assert_eq!(stats.failed_retries(), 0);
    assert_eq!(stats.total_retry_attempts(), 2);
    assert_eq!(stats.status_count(503), 2);
}

#[tokio::test(start_paused = true)]
async fn test_success_reports_elapsed_including_waits() {
    let executor = RetryExecutor::new(
        policy(3, 100, 1_000).build().unwrap(),
        Arc::new(RetryStatistics::new()),
    );
    let calls = &AtomicU32::new(0);

    let result = executor
        .execute("GET /users", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ApiError::status(503, "/users", "GET"))
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();

    // 100 + 200
    assert_eq!(result.elapsed(), Duration::from_millis(300));
    assert_eq!(result.elapsed(), result.record.total_delay());
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhausted_returns_final_error() {
    let stats = Arc::new(RetryStatistics::new());
    let executor = RetryExecutor::new(policy(3, 10, 100).build().unwrap(), stats.clone());
    let calls = &AtomicU32::new(0);

    let err = executor
        .execute("GET /flaky", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ApiError::timed_out("/flaky", "GET"))
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 4); // 1 initial + 3 retries
    assert!(err.is_exhausted());
    assert_eq!(err.attempts(), 4);
    assert_eq!(err.record().outcome(), RecordOutcome::Exhausted);
    assert_eq!(err.cause(), Some(&ApiError::timed_out("/flaky", "GET")));
    assert_eq!(stats.failed_retries(), 1);
    assert_eq!(stats.category_count(ErrorCategory::NetworkTimeout), 4);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_surfaces_last_error() {
    let executor = RetryExecutor::new(
        policy(3, 10, 100).build().unwrap(),
        Arc::new(RetryStatistics::new()),
    );
    let calls = &AtomicU32::new(0);

    let err = executor
        .execute("GET /gateway", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) as u16;
            Err::<(), _>(ApiError::status(500 + n, "/gateway", "GET"))
        })
        .await
        .unwrap_err();

    assert!(err.is_exhausted());
    assert_eq!(err.cause(), Some(&ApiError::status(503, "/gateway", "GET")));
    assert_eq!(
        err.record()
            .entries()
            .iter()
            .map(|e| e.status_code)
            .collect::<Vec<_>>(),
        vec![Some(500), Some(501), Some(502), Some(503)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_zero_retries_makes_single_attempt() {
    let executor = RetryExecutor::new(
        policy(0, 10, 100).build().unwrap(),
        Arc::new(RetryStatistics::new()),
    );
    let calls = &AtomicU32::new(0);

    let err = executor
        .execute("GET /once", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ApiError::connect_refused("/once", "GET"))
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // retryable category, so running out is exhaustion rather than a hard stop
    assert!(err.is_exhausted());
    assert!(err.record().delays().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_client_error_is_not_retried() {
    let stats = Arc::new(RetryStatistics::new());
    let executor = RetryExecutor::new(policy(5, 10, 100).build().unwrap(), stats.clone());
    let calls = &AtomicU32::new(0);

    let err = executor
        .execute("POST /users", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ApiError::status_with_body(
                400,
                "{\"error\":\"invalid\"}",
                "/users",
                "POST",
            ))
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(err.is_non_retryable());
    assert_eq!(err.cause().and_then(ApiError::body), Some("{\"error\":\"invalid\"}"));
    assert_eq!(stats.total_requests(), 1);
    assert_eq!(stats.requests_with_retries(), 0);
    assert_eq!(stats.status_count(400), 1);
}

#[tokio::test(start_paused = true)]
async fn test_status_whitelist_beats_category() {
    // 418 is a client error, but the whitelist says retry it
    let executor = RetryExecutor::new(
        policy(2, 10, 100).retryable_status_code(418).build().unwrap(),
        Arc::new(RetryStatistics::new()),
    );

    let err = executor
        .execute("GET /teapot", || async {
            Err::<(), _>(ApiError::status(418, "/teapot", "GET"))
        })
        .await
        .unwrap_err();

    assert!(err.is_exhausted());
    assert_eq!(err.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_per_category_override_uses_decorrelated_jitter() {
    let stats = Arc::new(RetryStatistics::new());
    let policy = policy(4, 100, 10_000)
        .backoff_strategy(BackoffKind::Fixed)
        .error_specific_backoff(ErrorCategory::ClientThrottled, BackoffKind::DecorrelatedJitter)
        .build()
        .unwrap();
    let executor = RetryExecutor::new(policy, stats.clone()).with_jitter_seed(7);

    let err = executor
        .execute("GET /limited", || async {
            Err::<(), _>(ApiError::status(429, "/limited", "GET"))
        })
        .await
        .unwrap_err();

    let entries: Vec<_> = err.record().entries().iter().filter(|e| e.delay.is_some()).collect();
    assert_eq!(entries.len(), 4);
    assert!(entries
        .iter()
        .all(|e| e.strategy == Some(BackoffKind::DecorrelatedJitter)));

    // each delay lies in [initial, 3 * previous]
    let mut previous = Duration::from_millis(100);
    for delay in err.record().delays() {
        assert!(delay >= Duration::from_millis(100), "{:?} below initial", delay);
        assert!(delay <= previous * 3, "{:?} above 3 x {:?}", delay, previous);
        previous = delay;
    }

    assert_eq!(stats.strategy_count(BackoffKind::DecorrelatedJitter), 4);
    assert_eq!(stats.strategy_count(BackoffKind::Fixed), 0);
}

#[tokio::test(start_paused = true)]
async fn test_seeded_jitter_is_reproducible() {
    let policy = Arc::new(
        policy(5, 50, 5_000)
            .backoff_strategy(BackoffKind::ExponentialWithFullJitter)
            .build()
            .unwrap(),
    );

    let run = |seed: u64| {
        let executor =
            RetryExecutor::new(policy.clone(), Arc::new(RetryStatistics::new())).with_jitter_seed(seed);
        async move {
            executor
                .execute("GET /jitter", || async {
                    Err::<(), _>(ApiError::status(502, "/jitter", "GET"))
                })
                .await
                .unwrap_err()
                .record()
                .delays()
        }
    };

    let first = run(42).await;
    let second = run(42).await;
    assert_eq!(first.len(), 5);
    assert_eq!(first, second);

    for (i, delay) in first.iter().enumerate() {
        let ceiling = Duration::from_millis(50) * 2u32.pow(i as u32);
        assert!(*delay <= ceiling.min(Duration::from_millis(5_000)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_sleeps_for_computed_delays() {
    let executor = RetryExecutor::new(
        policy(3, 100, 1_000).build().unwrap(),
        Arc::new(RetryStatistics::new()),
    );

    let start = tokio::time::Instant::now();
    let err = executor
        .execute("GET /slow", || async {
            Err::<(), _>(ApiError::status(500, "/slow", "GET"))
        })
        .await
        .unwrap_err();

    // 100 + 200 + 400 under paused time
    assert_eq!(start.elapsed(), Duration::from_millis(700));
    assert_eq!(err.record().total_delay(), Duration::from_millis(700));
    assert_eq!(err.elapsed(), Duration::from_millis(700));
    assert_eq!(
        err.to_string(),
        "retry exhausted after 4 attempts (700ms): GET /slow returned HTTP 500"
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_first_attempt() {
    let stats = Arc::new(RetryStatistics::new());
    let executor = RetryExecutor::new(policy(3, 10, 100).build().unwrap(), stats.clone());
    let token = CancellationToken::new();
    token.cancel();
    let calls = &AtomicU32::new(0);

    let err = executor
        .execute_with_cancel(
            "GET /never",
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ApiError>(())
            },
            &token,
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.attempts(), 0);
    assert_eq!(err.cause(), None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(stats.total_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting() {
    let stats = Arc::new(RetryStatistics::new());
    let executor = RetryExecutor::new(policy(3, 1_000, 10_000).build().unwrap(), stats.clone());
    let token = CancellationToken::new();
    let calls = Arc::new(AtomicU32::new(0));

    let handle = tokio::spawn({
        let token = token.clone();
        let calls = calls.clone();
        async move {
            executor
                .execute_with_cancel(
                    "GET /cancel",
                    move || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Err::<(), _>(ApiError::status(503, "/cancel", "GET"))
                        }
                    },
                    &token,
                )
                .await
        }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();
    let err = handle.await.unwrap().unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.attempts(), 1);
    assert_eq!(err.record().outcome(), RecordOutcome::Cancelled);
    assert_eq!(err.cause(), Some(&ApiError::status(503, "/cancel", "GET")));

    // cancellation is neither a success nor a failure
    assert_eq!(stats.total_requests(), 0);
    assert_eq!(stats.failed_retries(), 0);
    assert_eq!(stats.total_retry_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shared_statistics_across_executors() {
    let stats = Arc::new(RetryStatistics::new());
    let fast = RetryExecutor::new(policy(1, 10, 100).build().unwrap(), stats.clone());
    let patient = RetryExecutor::new(
        policy(3, 10, 100)
            .backoff_strategy(BackoffKind::Linear)
            .build()
            .unwrap(),
        stats.clone(),
    );

    let _ = fast
        .execute("GET /a", || async {
            Err::<(), _>(ApiError::status(504, "/a", "GET"))
        })
        .await;
    let _ = patient
        .execute("GET /b", || async { Ok::<_, ApiError>(()) })
        .await;

    let aggregate = stats.get_aggregate_statistics();
    assert_eq!(aggregate.total_requests, 2);
    assert_eq!(aggregate.requests_with_retries, 1);
    assert_eq!(aggregate.failed_retries, 1);
    assert_eq!(aggregate.retry_percentage(), 50.0);
}

#[tokio::test(start_paused = true)]
#[tracing_test::traced_test]
async fn test_logs_backoff_and_success() {
    let executor = RetryExecutor::new(
        policy(2, 10, 100).build().unwrap(),
        Arc::new(RetryStatistics::new()),
    );
    let calls = &AtomicU32::new(0);

    executor
        .execute("GET /logged", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ApiError::unknown_host("/logged", "GET"))
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();

    assert!(logs_contain("attempt failed, backing off"));
    assert!(logs_contain("DNS_RESOLUTION_ERROR"));
    assert!(logs_contain("succeeded after retrying"));
}
