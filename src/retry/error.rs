//! Error types for retry operations.

use std::time::Duration;

use thiserror::Error;

use crate::retry::classify::ErrorCategory;
use crate::retry::record::RetryRecord;

/// Terminal failure of a retried execution.
///
/// Every variant carries the full [`RetryRecord`], so attempt count,
/// per-attempt error categories and elapsed time are available without
/// re-running anything.
///
/// # Examples
///
/// ```rust
/// use rebound::{ErrorCategory, RetryError, RetryExecutor, RetryPolicy, RetryStatistics};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let policy = RetryPolicy::builder()
///     .max_retries(2)
///     .initial_delay(Duration::from_millis(1))
///     .build()
///     .unwrap();
/// let executor = RetryExecutor::new(policy, Arc::new(RetryStatistics::new()));
///
/// let result = executor
///     .execute_with(
///         "ping",
///         || async { Err::<(), _>("connection refused") },
///         |_| (ErrorCategory::ConnectionError, None),
///     )
///     .await;
///
/// match result {
///     Err(RetryError::Exhausted { cause, record }) => {
///         assert_eq!(cause, "connection refused");
///         assert_eq!(record.attempts(), 3); // 1 initial + 2 retries
///     }
///     other => panic!("expected exhaustion, got {:?}", other),
/// }
/// # });
/// ```
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every allowed attempt failed; `cause` is the error of the last one.
    Exhausted {
        /// Error from the final attempt.
        cause: E,
        /// Attempt history.
        record: RetryRecord,
    },
    /// An attempt failed in a way the policy does not retry.
    NonRetryable {
        /// The non-retryable error.
        cause: E,
        /// Attempt history.
        record: RetryRecord,
    },
    /// Cancellation was observed before the execution finished.
    Cancelled {
        /// Error of the last failed attempt, if any attempt ran.
        last_error: Option<E>,
        /// Attempt history up to cancellation.
        record: RetryRecord,
    },
}

impl<E> RetryError<E> {
    /// Attempt history.
    pub fn record(&self) -> &RetryRecord {
        match self {
            Self::Exhausted { record, .. }
            | Self::NonRetryable { record, .. }
            | Self::Cancelled { record, .. } => record,
        }
    }

    /// Total attempts made (initial + retries).
    pub fn attempts(&self) -> u32 {
        self.record().attempts()
    }

    /// Time from the first attempt to termination.
    pub fn elapsed(&self) -> Duration {
        self.record().elapsed()
    }

    /// Categories of every failed attempt, in order.
    pub fn error_categories(&self) -> Vec<ErrorCategory> {
        self.record().error_categories()
    }

    /// The last attempt's error, if there was one.
    pub fn cause(&self) -> Option<&E> {
        match self {
            Self::Exhausted { cause, .. } | Self::NonRetryable { cause, .. } => Some(cause),
            Self::Cancelled { last_error, .. } => last_error.as_ref(),
        }
    }

    /// Extract the last attempt's error, discarding the history.
    pub fn into_cause(self) -> Option<E> {
        match self {
            Self::Exhausted { cause, .. } | Self::NonRetryable { cause, .. } => Some(cause),
            Self::Cancelled { last_error, .. } => last_error,
        }
    }

    /// Returns true if retries ran out.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Returns true if the failure was not retryable.
    pub fn is_non_retryable(&self) -> bool {
        matches!(self, Self::NonRetryable { .. })
    }

    /// Returns true if the execution was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted { cause, record } => write!(
                f,
                "retry exhausted after {} attempts ({:?}): {}",
                record.attempts(),
                record.elapsed(),
                cause
            ),
            Self::NonRetryable { cause, record } => write!(
                f,
                "non-retryable failure on attempt {} ({:?}): {}",
                record.attempts(),
                record.elapsed(),
                cause
            ),
            Self::Cancelled { record, .. } => write!(
                f,
                "execution of {} cancelled after {} attempts ({:?})",
                record.operation(),
                record.attempts(),
                record.elapsed()
            ),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Invalid retry policy settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The initial delay must be positive.
    #[error("initial delay must be greater than zero")]
    ZeroInitialDelay,
    /// The cap must be at least the initial delay.
    #[error("max delay {max:?} is below initial delay {initial:?}")]
    MaxDelayBelowInitial {
        /// Configured initial delay.
        initial: Duration,
        /// Configured cap.
        max: Duration,
    },
    /// Unrecognised backoff strategy name.
    #[error("unknown backoff strategy: {0}")]
    UnknownStrategy(String),
    /// Unrecognised error category name.
    #[error("unknown error category: {0}")]
    UnknownCategory(String),
}
