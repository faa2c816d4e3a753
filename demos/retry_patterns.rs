//! Retry Patterns Example
//!
//! Demonstrates the retry executor against simulated API calls.
//! Shows practical patterns including:
//! - Retrying transient failures with exponential backoff
//! - Comparing backoff strategies
//! - Per-category strategy overrides for throttling
//! - Stopping early on non-retryable failures
//! - Cancelling an execution mid-backoff
//! - Loading a policy from configuration and reading aggregate statistics

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rebound::prelude::*;
use rebound::{BackoffCalculator, RetryError};
use tokio_util::sync::CancellationToken;

// ==================== Basic Retry ====================

/// Example 1: Basic retry with exponential backoff
///
/// The simulated endpoint answers 503 twice before recovering.
async fn example_basic_retry(stats: Arc<RetryStatistics>) {
    println!("\n=== Example 1: Basic Retry ===");

    let policy = RetryPolicy::builder()
        .max_retries(5)
        .initial_delay(Duration::from_millis(100))
        .build()
        .expect("valid policy");
    let executor = RetryExecutor::new(policy, stats);

    let attempts = &AtomicU32::new(0);
    let result = executor
        .execute("GET /users/2", move || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            println!("  Attempt {}", n + 1);
            if n < 2 {
                Err(ApiError::status(503, "/users/2", "GET"))
            } else {
                Ok("{\"id\": 2}")
            }
        })
        .await;

    match result {
        Ok(success) => println!(
            "Success after {} attempts ({:?} waiting): {}",
            success.attempts(),
            success.record.total_delay(),
            success.value
        ),
        Err(err) => println!("Failed: {}", err),
    }
}

// ==================== Different Backoff Strategies ====================

/// Example 2: Comparing different backoff strategies
///
/// Shows how delay grows per retry for every strategy. Jittered strategies
/// use a fixed seed so the output is stable between runs.
fn example_backoff_strategies() {
    println!("\n=== Example 2: Backoff Strategies ===");

    for kind in BackoffKind::ALL {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(2))
            .backoff_strategy(kind)
            .build()
            .expect("valid policy");
        let mut calculator = BackoffCalculator::seeded(42);
        let mut previous = None;
        let delays: Vec<u128> = (1..=6)
            .map(|attempt| {
                let delay = calculator.delay_for(kind, attempt, previous, &policy);
                previous = Some(delay);
                delay.as_millis()
            })
            .collect();
        println!("  {:<30} {:?} ms", kind.as_str(), delays);
    }
}

// ==================== Per-Category Overrides ====================

/// Example 3: Decorrelated jitter for throttling only
///
/// Server errors back off exponentially; 429 responses use decorrelated
/// jitter so that many throttled clients spread out.
async fn example_category_override(stats: Arc<RetryStatistics>) {
    println!("\n=== Example 3: Per-Category Overrides ===");

    let policy = RetryPolicy::builder()
        .max_retries(4)
        .initial_delay(Duration::from_millis(50))
        .max_delay(Duration::from_millis(800))
        .error_specific_backoff(ErrorCategory::ClientThrottled, BackoffKind::DecorrelatedJitter)
        .build()
        .expect("valid policy");
    let executor = RetryExecutor::new(policy, stats).with_jitter_seed(7);

    let result = executor
        .execute("POST /login", || async {
            Err::<(), _>(ApiError::status(429, "/login", "POST"))
        })
        .await;

    if let Err(err) = result {
        for entry in err.record().entries() {
            println!(
                "  attempt {} -> {:?} then {:?} via {:?}",
                entry.attempt, entry.category, entry.delay, entry.strategy
            );
        }
        println!("{}", err);
    }
}

// ==================== Non-Retryable Failures ====================

/// Example 4: A 400 is surfaced immediately
async fn example_non_retryable(stats: Arc<RetryStatistics>) {
    println!("\n=== Example 4: Non-Retryable Failure ===");

    let executor = RetryExecutor::new(RetryPolicy::default(), stats);
    let result = executor
        .execute("POST /users", || async {
            Err::<(), _>(ApiError::status_with_body(
                400,
                "{\"error\": \"Missing password\"}",
                "/users",
                "POST",
            ))
        })
        .await;

    match result {
        Err(RetryError::NonRetryable { cause, record }) => println!(
            "Gave up after {} attempt: {} body={:?}",
            record.attempts(),
            cause,
            cause.body()
        ),
        other => println!("Unexpected: {:?}", other),
    }
}

// ==================== Cancellation ====================

/// Example 5: Cancelling while the executor waits between attempts
async fn example_cancellation(stats: Arc<RetryStatistics>) {
    println!("\n=== Example 5: Cancellation ===");

    let policy = RetryPolicy::builder()
        .initial_delay(Duration::from_secs(5))
        .max_delay(Duration::from_secs(5))
        .build()
        .expect("valid policy");
    let executor = RetryExecutor::new(policy, stats);
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            println!("  cancelling");
            token.cancel();
        })
    };

    let result = executor
        .execute_with_cancel(
            "GET /slow",
            || async { Err::<(), _>(ApiError::timed_out("/slow", "GET")) },
            &token,
        )
        .await;
    let _ = canceller.await;

    if let Err(err) = result {
        println!("{} (cancelled: {})", err, err.is_cancelled());
    }
}

// ==================== Configuration ====================

/// Example 6: Loading a policy from TOML
fn example_configuration() -> Option<RetryPolicy> {
    println!("\n=== Example 6: Configuration ===");

    let config = RetryConfig::from_toml_str(
        r#"
        [connection.retry]
        max_retries = 2
        initial_delay_ms = 250
        backoff_strategy = "FIBONACCI"

        [connection.retry.error_specific_backoff]
        NETWORK_TIMEOUT = "LINEAR"
        "#,
    );

    match config.and_then(RetryConfig::into_policy) {
        Ok(policy) => {
            println!("  {:?}", policy);
            Some(policy)
        }
        Err(err) => {
            println!("  invalid configuration: {}", err);
            None
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("Retry Patterns Examples");
    println!("=======================");

    let stats = Arc::new(RetryStatistics::new());

    example_basic_retry(stats.clone()).await;
    example_backoff_strategies();
    example_category_override(stats.clone()).await;
    example_non_retryable(stats.clone()).await;
    example_cancellation(stats.clone()).await;
    let _ = example_configuration();

    println!("\n=== Aggregate Statistics ===");
    for (label, value) in stats.get_aggregate_statistics().to_map() {
        println!("  {:<32} {}", label, value);
    }
}
