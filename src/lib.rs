//! # Rebound
//!
//! > *"What fails fast comes back slow"*
//!
//! Retry and backoff for network operations that fail transiently.
//!
//! ## Philosophy
//!
//! **Rebound** keeps the retry decision pure and the retry loop thin:
//! - **Policy** = immutable data; delays and retry decisions are plain
//!   functions of policy and attempt number
//! - **Executor** = the shell that calls the operation, sleeps between
//!   attempts, honours cancellation, and records statistics
//!
//! ## Quick Example
//!
//! ```rust
//! use rebound::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_retries(3)
//!     .initial_delay(Duration::from_millis(10))
//!     .backoff_strategy(BackoffKind::ExponentialWithEqualJitter)
//!     .error_specific_backoff(ErrorCategory::ClientThrottled, BackoffKind::DecorrelatedJitter)
//!     .build()
//!     .unwrap();
//! let stats = Arc::new(RetryStatistics::new());
//! let executor = RetryExecutor::new(policy, stats.clone());
//!
//! match executor
//!     .execute("GET /users/2", || async { Err::<(), _>(ApiError::status(404, "/users/2", "GET")) })
//!     .await
//! {
//!     Err(RetryError::NonRetryable { record, .. }) => assert_eq!(record.attempts(), 1),
//!     other => panic!("unexpected: {:?}", other),
//! }
//!
//! let aggregate = stats.get_aggregate_statistics();
//! assert_eq!(aggregate.total_requests, 1);
//! assert_eq!(aggregate.by_status_code.get(&404), Some(&1));
//! # });
//! ```
//!
//! For a runnable walkthrough, see `demos/retry_patterns.rs`.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod retry;
pub mod testing;
pub mod transport;

// Re-exports
pub use config::{ConfigError, ConfigSource, LayeredSource, RetryConfig};
pub use retry::{
    base_delay, fibonacci, is_retryable, resolve_strategy, should_retry, AggregateStatistics,
    AttemptEntry, AttemptFailure, AttemptOutcome, BackoffCalculator, BackoffKind, Classify,
    ErrorCategory, ExecutorState, PolicyError, RecordOutcome, Retried, RetryError,
    RetryExecutor, RetryPolicy, RetryPolicyBuilder, RetryRecord, RetryStatistics, StatValue,
};
pub use transport::{ApiError, TransportKind};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::RetryConfig;
    pub use crate::retry::{
        BackoffKind, Classify, ErrorCategory, Retried, RetryError, RetryExecutor, RetryPolicy,
        RetryStatistics,
    };
    pub use crate::transport::ApiError;
}
