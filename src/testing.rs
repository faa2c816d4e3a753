//! Testing utilities for code that retries.
//!
//! This module provides a scripted operation double, assertion macros for
//! terminal retry outcomes, and property-based testing support.
//!
//! # Examples
//!
//! ## Scripted Operations
//!
//! ```rust
//! use rebound::testing::ScriptedOperation;
//! use rebound::{ApiError, RetryExecutor, RetryPolicy, RetryStatistics};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let op = ScriptedOperation::failing_then(
//!     [ApiError::status(503, "/users", "GET")],
//!     "ok",
//! );
//! let policy = RetryPolicy::builder()
//!     .initial_delay(Duration::from_millis(1))
//!     .build()
//!     .unwrap();
//! let executor = RetryExecutor::new(policy, Arc::new(RetryStatistics::new()));
//!
//! let result = executor.execute("GET /users", || op.call()).await.unwrap();
//! assert_eq!(result.value, "ok");
//! assert_eq!(op.calls(), 2);
//! # });
//! ```
//!
//! ## Assertion Macros
//!
//! ```rust
//! use rebound::testing::ScriptedOperation;
//! use rebound::{assert_non_retryable, ApiError, RetryExecutor, RetryPolicy, RetryStatistics};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let op = ScriptedOperation::<(), _>::always(Err(ApiError::status(400, "/users", "POST")));
//! let executor = RetryExecutor::new(RetryPolicy::default(), Arc::new(RetryStatistics::new()));
//!
//! let record = assert_non_retryable!(executor.execute("POST /users", || op.call()).await);
//! assert_eq!(record.attempts(), 1);
//! # });
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{ready, Ready};

/// An operation double that replays a fixed script of outcomes.
///
/// Each [`call`](Self::call) takes the next outcome; the last one repeats
/// once the script runs out. Clones share the script and the call counter,
/// so a clone can be moved into the operation closure while the original is
/// inspected afterwards.
#[derive(Debug, Clone)]
pub struct ScriptedOperation<T, E> {
    script: Arc<Mutex<VecDeque<Result<T, E>>>>,
    calls: Arc<AtomicU32>,
}

impl<T: Clone, E: Clone> ScriptedOperation<T, E> {
    /// Replay `script` in order.
    ///
    /// # Panics
    ///
    /// Panics if `script` is empty.
    pub fn new(script: impl IntoIterator<Item = Result<T, E>>) -> Self {
        let script: VecDeque<_> = script.into_iter().collect();
        assert!(!script.is_empty(), "scripted operation needs at least one outcome");
        Self {
            script: Arc::new(Mutex::new(script)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Fail with each of `failures` in turn, then succeed with `value`.
    pub fn failing_then(failures: impl IntoIterator<Item = E>, value: T) -> Self {
        Self::new(failures.into_iter().map(Err).chain(std::iter::once(Ok(value))))
    }

    /// Return `outcome` on every call.
    pub fn always(outcome: Result<T, E>) -> Self {
        Self::new([outcome])
    }

    /// Run one attempt.
    pub fn call(&self) -> Ready<Result<T, E>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        match outcome {
            Some(outcome) => ready(outcome),
            None => unreachable!("script is never emptied"),
        }
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Outcomes not yet replayed, the repeating last one included.
    pub fn remaining(&self) -> usize {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Assert that an execution ran out of retries.
///
/// Evaluates to the execution's [`RetryRecord`](crate::RetryRecord). With
/// `attempts = n`, also checks the attempt count.
///
/// # Example
///
/// ```rust
/// use rebound::testing::ScriptedOperation;
/// use rebound::{assert_exhausted, ApiError, RetryExecutor, RetryPolicy, RetryStatistics};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let op = ScriptedOperation::<(), _>::always(Err(ApiError::timed_out("/slow", "GET")));
/// let policy = RetryPolicy::builder()
///     .max_retries(2)
///     .initial_delay(Duration::from_millis(1))
///     .build()
///     .unwrap();
/// let executor = RetryExecutor::new(policy, Arc::new(RetryStatistics::new()));
///
/// assert_exhausted!(executor.execute("GET /slow", || op.call()).await, attempts = 3);
/// # });
/// ```
#[macro_export]
macro_rules! assert_exhausted {
    ($result:expr) => {
        match $result {
            Err($crate::RetryError::Exhausted { record, .. }) => record,
            other => panic!("Expected Exhausted, got {:?}", other),
        }
    };
    ($result:expr, attempts = $attempts:expr) => {{
        let record = $crate::assert_exhausted!($result);
        assert_eq!(record.attempts(), $attempts, "attempt count");
        record
    }};
}

/// Assert that an execution stopped on a non-retryable failure.
///
/// Evaluates to the execution's [`RetryRecord`](crate::RetryRecord).
#[macro_export]
macro_rules! assert_non_retryable {
    ($result:expr) => {
        match $result {
            Err($crate::RetryError::NonRetryable { record, .. }) => record,
            other => panic!("Expected NonRetryable, got {:?}", other),
        }
    };
}

/// Assert that an execution was cancelled.
///
/// Evaluates to the execution's [`RetryRecord`](crate::RetryRecord).
#[macro_export]
macro_rules! assert_cancelled {
    ($result:expr) => {
        match $result {
            Err($crate::RetryError::Cancelled { record, .. }) => record,
            other => panic!("Expected Cancelled, got {:?}", other),
        }
    };
}

#[cfg(feature = "proptest")]
use crate::retry::{BackoffKind, ErrorCategory};
#[cfg(feature = "proptest")]
use proptest::prelude::*;

#[cfg(feature = "proptest")]
impl Arbitrary for BackoffKind {
    type Parameters = ();
    type Strategy = proptest::sample::Select<BackoffKind>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        proptest::sample::select(BackoffKind::ALL.to_vec())
    }
}

#[cfg(feature = "proptest")]
impl Arbitrary for ErrorCategory {
    type Parameters = ();
    type Strategy = proptest::sample::Select<ErrorCategory>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        proptest::sample::select(ErrorCategory::ALL.to_vec())
    }
}
