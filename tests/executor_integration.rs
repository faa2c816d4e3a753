//! End-to-end tests: configuration through execution to aggregate statistics

use rebound::testing::ScriptedOperation;
use rebound::{
    assert_cancelled, assert_exhausted, assert_non_retryable, ApiError, BackoffKind,
    ErrorCategory, RetryConfig, RetryExecutor, RetryStatistics, StatValue,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn executor_from(pairs: &[(&str, &str)]) -> (RetryExecutor, Arc<RetryStatistics>) {
    let source: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let policy = RetryConfig::from_source(&source)
        .unwrap()
        .into_policy()
        .unwrap();
    let stats = Arc::new(RetryStatistics::new());
    (RetryExecutor::new(policy, stats.clone()), stats)
}

#[tokio::test(start_paused = true)]
async fn configured_policy_drives_execution() {
    let (executor, stats) = executor_from(&[
        ("connection.retry.max_retries", "2"),
        ("connection.retry.initial_delay_ms", "200"),
        ("connection.retry.max_delay_ms", "1000"),
        ("connection.retry.backoff_strategy", "LINEAR"),
    ]);
    let op = ScriptedOperation::<(), _>::always(Err(ApiError::status(502, "/orders", "GET")));

    let start = tokio::time::Instant::now();
    let record = assert_exhausted!(
        executor.execute("GET /orders", || op.call()).await,
        attempts = 3
    );

    assert_eq!(
        record.delays(),
        vec![Duration::from_millis(200), Duration::from_millis(400)]
    );
    assert_eq!(start.elapsed(), Duration::from_millis(600));
    assert_eq!(stats.strategy_count(BackoffKind::Linear), 2);
}

#[tokio::test(start_paused = true)]
async fn whitelisted_status_overrides_client_error() {
    let (executor, stats) = executor_from(&[
        ("connection.retry.initial_delay_ms", "10"),
        ("connection.retry.retryable_status_codes", "409"),
        ("connection.retry.retryable_error_codes", ""),
    ]);

    let conflict = ScriptedOperation::failing_then([ApiError::status(409, "/lock", "PUT")], "locked");
    let result = executor.execute("PUT /lock", || conflict.call()).await.unwrap();
    assert_eq!(result.attempts(), 2);

    // categories were emptied, so even a timeout is final now
    let timeout = ScriptedOperation::<(), _>::always(Err(ApiError::timed_out("/lock", "PUT")));
    let record = assert_non_retryable!(executor.execute("PUT /lock", || timeout.call()).await);
    assert_eq!(record.error_categories(), vec![ErrorCategory::NetworkTimeout]);

    assert_eq!(stats.total_requests(), 2);
    assert_eq!(stats.successful_retries(), 1);
}

#[derive(Debug)]
enum StoreError {
    Busy,
    Corrupt,
}

#[tokio::test(start_paused = true)]
async fn closure_classifier_for_foreign_errors() {
    let (executor, _) = executor_from(&[("connection.retry.initial_delay_ms", "5")]);
    let op = ScriptedOperation::new([Err("busy"), Err("busy"), Err("corrupt")]);

    let err = executor
        .execute_with(
            "store.write",
            || async {
                match op.call().await {
                    Ok(()) => Ok(()),
                    Err("busy") => Err(StoreError::Busy),
                    Err(_) => Err(StoreError::Corrupt),
                }
            },
            |e| match e {
                StoreError::Busy => (ErrorCategory::ClientThrottled, Some(429)),
                StoreError::Corrupt => (ErrorCategory::Unknown, None),
            },
        )
        .await
        .unwrap_err();

    assert!(err.is_non_retryable());
    assert!(matches!(err.cause(), Some(StoreError::Corrupt)));
    assert_eq!(
        err.error_categories(),
        vec![
            ErrorCategory::ClientThrottled,
            ErrorCategory::ClientThrottled,
            ErrorCategory::Unknown,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn default_token_cancels_every_execution() {
    let token = CancellationToken::new();
    let (executor, stats) = executor_from(&[("connection.retry.initial_delay_ms", "5000")]);
    let executor = executor.with_cancellation(token.clone());
    let op = ScriptedOperation::<(), _>::always(Err(ApiError::connect_refused("/ws", "GET")));

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
    });

    let record = assert_cancelled!(executor.execute("GET /ws", || op.call()).await);
    canceller.await.unwrap();

    assert_eq!(record.attempts(), 1);
    assert_eq!(op.calls(), 1);
    assert_eq!(stats.total_requests(), 0);

    // the token stays cancelled, so later executions never start
    let record = assert_cancelled!(executor.execute("GET /ws", || op.call()).await);
    assert_eq!(record.attempts(), 0);
    assert_eq!(op.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn aggregate_map_for_reports() {
    let (executor, stats) = executor_from(&[("connection.retry.initial_delay_ms", "1")]);
    let op = ScriptedOperation::failing_then([ApiError::status(503, "/r", "GET")], ());
    executor.execute("GET /r", || op.call()).await.unwrap();
    let ok = ScriptedOperation::<_, ApiError>::always(Ok(()));
    executor.execute("GET /r", || ok.call()).await.unwrap();

    let map = stats.get_aggregate_statistics().to_map();
    assert_eq!(map.get("total_requests"), Some(&StatValue::Count(2)));
    assert_eq!(map.get("retry_percentage"), Some(&StatValue::Percentage(50.0)));
    assert_eq!(map.get("retry_success_rate"), Some(&StatValue::Percentage(100.0)));
    assert_eq!(map.get("status.503"), Some(&StatValue::Count(1)));
    assert_eq!(map.get("category.SERVER_ERROR"), Some(&StatValue::Count(1)));
    assert_eq!(map.get("strategy.EXPONENTIAL"), Some(&StatValue::Count(1)));
}
