//! Retry and backoff for fallible network operations.
//!
//! The pieces, leaves first:
//!
//! - **Pure core**: [`RetryPolicy`] is immutable data; [`base_delay`] and
//!   [`should_retry`] are plain functions of their inputs
//! - **Jitter**: [`BackoffCalculator`] owns a seedable random source, so
//!   jittered sequences can be reproduced exactly in tests
//! - **Shell**: [`RetryExecutor`] runs the attempt loop, sleeps between
//!   attempts without blocking other tasks, honours cancellation, and records
//!   into a shared [`RetryStatistics`]
//!
//! # Quick Start
//!
//! ```rust
//! use rebound::{ApiError, RetryExecutor, RetryPolicy, RetryStatistics};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_retries(3)
//!     .initial_delay(Duration::from_millis(5))
//!     .build()
//!     .unwrap();
//! let executor = RetryExecutor::new(policy, Arc::new(RetryStatistics::new()));
//!
//! let result = executor
//!     .execute("GET /health", || async { Ok::<_, ApiError>("ok") })
//!     .await
//!     .unwrap();
//!
//! assert_eq!(result.into_value(), "ok");
//! # });
//! ```
//!
//! # Backoff Strategies
//!
//! - **Fixed**: the initial delay every time
//! - **Linear**: initial * attempt (100ms, 200ms, 300ms, ...)
//! - **Exponential**: initial * 2^(attempt-1) (100ms, 200ms, 400ms, ...)
//! - **Fibonacci**: initial * fib(attempt) (100ms, 100ms, 200ms, 300ms, ...)
//! - **Full jitter**: uniform in `[0, exponential]`
//! - **Equal jitter**: `exponential/2 + uniform[0, exponential/2]`
//! - **Decorrelated jitter**: uniform in `[initial, 3 * previous]`
//!
//! Every delay is clamped to the policy's `max_delay`.
//!
//! # Error Types
//!
//! - [`RetryError`]: terminal outcome of an execution, with its [`RetryRecord`]
//! - [`PolicyError`]: invalid policy settings or unknown names

mod backoff;
mod classify;
mod error;
mod executor;
mod policy;
mod record;
mod stats;

pub use backoff::{base_delay, fibonacci, BackoffCalculator};
pub use classify::{
    is_retryable, resolve_strategy, should_retry, AttemptFailure, AttemptOutcome, Classify,
    ErrorCategory,
};
pub use error::{PolicyError, RetryError};
pub use executor::{ExecutorState, Retried, RetryExecutor};
pub use policy::{
    BackoffKind, RetryPolicy, RetryPolicyBuilder, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRYABLE_CATEGORIES, DEFAULT_RETRYABLE_STATUS_CODES,
};
pub use record::{AttemptEntry, RecordOutcome, RetryRecord};
pub use stats::{AggregateStatistics, RetryStatistics, StatValue};

#[cfg(test)]
mod tests;
