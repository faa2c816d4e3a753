//! The retry loop.
//!
//! An execution moves through `Attempting → (Success | Evaluating) →
//! (Waiting → Attempting) | Terminated`. Each attempt that ends in `Waiting`
//! or a terminal state appends exactly one entry to the execution's
//! [`RetryRecord`] and makes exactly one update to the shared
//! [`RetryStatistics`]. Cancellation is not a failure and leaves the request
//! counters untouched.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Instrument};

use crate::retry::backoff::BackoffCalculator;
use crate::retry::classify::{
    is_retryable, resolve_strategy, should_retry, AttemptFailure, AttemptOutcome, Classify,
    ErrorCategory,
};
use crate::retry::error::RetryError;
use crate::retry::policy::RetryPolicy;
use crate::retry::record::{RecordOutcome, RetryRecord};
use crate::retry::stats::RetryStatistics;

/// States an execution passes through, as reported in trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// Running the operation.
    Attempting,
    /// Deciding whether a failure is retried.
    Evaluating,
    /// Sleeping before the next attempt.
    Waiting,
    /// Finished with a value.
    Success,
    /// Finished with a failure or cancellation.
    Terminated,
}

/// A successful value together with the history that produced it.
#[derive(Debug, Clone)]
pub struct Retried<T> {
    /// Value returned by the successful attempt.
    pub value: T,
    /// Attempt history.
    pub record: RetryRecord,
}

impl<T> Retried<T> {
    /// Total attempts made, the successful one included.
    pub fn attempts(&self) -> u32 {
        self.record.attempts()
    }

    /// Time from the first attempt to success, waits included.
    pub fn elapsed(&self) -> Duration {
        self.record.elapsed()
    }

    /// Extract the value, discarding the history.
    pub fn into_value(self) -> T {
        self.value
    }
}

/// Runs operations under a [`RetryPolicy`], recording into shared
/// [`RetryStatistics`].
///
/// The executor is cheap to clone. Policy and statistics are passed in
/// explicitly, so several executors (one per test class, say) can share one
/// statistics sink while using different policies.
///
/// # Examples
///
/// ```rust
/// use rebound::{ApiError, RetryExecutor, RetryPolicy, RetryStatistics};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let stats = Arc::new(RetryStatistics::new());
/// let policy = RetryPolicy::builder()
///     .max_retries(3)
///     .initial_delay(Duration::from_millis(1))
///     .build()
///     .unwrap();
/// let executor = RetryExecutor::new(policy, stats.clone());
///
/// let calls = &AtomicU32::new(0);
/// let result = executor
///     .execute("GET /users", move || async move {
///         if calls.fetch_add(1, Ordering::SeqCst) < 2 {
///             Err(ApiError::status(503, "/users", "GET"))
///         } else {
///             Ok("[]")
///         }
///     })
///     .await
///     .unwrap();
///
/// assert_eq!(result.value, "[]");
/// assert_eq!(result.attempts(), 3);
/// assert_eq!(stats.successful_retries(), 1);
/// assert_eq!(stats.total_retry_attempts(), 2);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: Arc<RetryPolicy>,
    statistics: Arc<RetryStatistics>,
    jitter_seed: Option<u64>,
    cancellation: Option<CancellationToken>,
}

impl RetryExecutor {
    /// Create an executor for `policy` recording into `statistics`.
    pub fn new(policy: impl Into<Arc<RetryPolicy>>, statistics: Arc<RetryStatistics>) -> Self {
        Self {
            policy: policy.into(),
            statistics,
            jitter_seed: None,
            cancellation: None,
        }
    }

    /// Seed every execution's jitter source with `seed`, making jittered
    /// delay sequences reproducible.
    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    /// Observe `token` in every execution that is not given its own.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// The policy in force.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The statistics sink.
    pub fn statistics(&self) -> &Arc<RetryStatistics> {
        &self.statistics
    }

    /// Run `op` until it succeeds, fails terminally or retries run out.
    ///
    /// `op` is called once per attempt and must build a fresh future each
    /// time. Errors are classified through their [`Classify`] impl.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: &str,
        op: F,
    ) -> Result<Retried<T>, RetryError<E>>
    where
        E: Classify,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(operation, op, classify_with_trait::<E>, None).await
    }

    /// Like [`execute`](Self::execute), observing `cancel` instead of the
    /// executor's default token.
    pub async fn execute_with_cancel<T, E, F, Fut>(
        &self,
        operation: &str,
        op: F,
        cancel: &CancellationToken,
    ) -> Result<Retried<T>, RetryError<E>>
    where
        E: Classify,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(operation, op, classify_with_trait::<E>, Some(cancel))
            .await
    }

    /// Like [`execute`](Self::execute), classifying errors with
    /// `classifier` for error types that do not implement [`Classify`].
    pub async fn execute_with<T, E, F, Fut, C>(
        &self,
        operation: &str,
        op: F,
        classifier: C,
    ) -> Result<Retried<T>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> (ErrorCategory, Option<u16>),
    {
        self.run(operation, op, classifier, None).await
    }

    async fn run<T, E, F, Fut, C>(
        &self,
        operation: &str,
        op: F,
        classifier: C,
        cancel: Option<&CancellationToken>,
    ) -> Result<Retried<T>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> (ErrorCategory, Option<u16>),
    {
        let cancel = cancel.or(self.cancellation.as_ref());
        let span = tracing::debug_span!("retry", operation = %operation);
        self.attempt_loop(RetryRecord::new(operation), op, classifier, cancel)
            .instrument(span)
            .await
    }

    async fn attempt_loop<T, E, F, Fut, C>(
        &self,
        mut record: RetryRecord,
        mut op: F,
        classifier: C,
        cancel: Option<&CancellationToken>,
    ) -> Result<Retried<T>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> (ErrorCategory, Option<u16>),
    {
        let policy = &*self.policy;
        let mut backoff = self.calculator();
        let mut last_error: Option<E> = None;
        let mut attempt = 1u32;

        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(Self::cancelled(record, last_error));
            }

            transition(ExecutorState::Attempting, attempt);
            debug!(attempt, "starting attempt");
            let outcome = match op().await {
                Ok(value) => AttemptOutcome::Success(value),
                Err(cause) => {
                    let (category, status) = classifier(&cause);
                    AttemptOutcome::Failure(AttemptFailure::new(category, status, cause))
                }
            };

            let retry = should_retry(&outcome, attempt, policy);
            let failure = match outcome {
                AttemptOutcome::Success(value) => {
                    transition(ExecutorState::Success, attempt);
                    record.push_success(attempt);
                    record.finish(RecordOutcome::Succeeded);
                    self.statistics.record_success(attempt);
                    if attempt > 1 {
                        info!(attempts = attempt, "succeeded after retrying");
                    }
                    return Ok(Retried { value, record });
                }
                AttemptOutcome::Failure(failure) => failure,
            };

            transition(ExecutorState::Evaluating, attempt);
            if !retry {
                return Err(self.terminate(record, attempt, failure));
            }

            let strategy = resolve_strategy(&failure, policy);
            let delay = backoff.delay_for(strategy, attempt, record.last_delay(), policy);
            transition(ExecutorState::Waiting, attempt);
            record.push_failure(attempt, &failure, Some((strategy, delay)));
            self.statistics
                .record_retry(failure.category, failure.status_code, strategy);
            warn!(
                attempt,
                category = %failure.category,
                status = ?failure.status_code,
                strategy = %strategy,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "attempt failed, backing off"
            );
            last_error = Some(failure.cause);

            match cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            return Err(Self::cancelled(record, last_error));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
            attempt += 1;
        }
    }

    fn terminate<E>(
        &self,
        mut record: RetryRecord,
        attempt: u32,
        failure: AttemptFailure<E>,
    ) -> RetryError<E> {
        transition(ExecutorState::Terminated, attempt);
        record.push_failure(attempt, &failure, None);
        self.statistics
            .record_failure(attempt, failure.category, failure.status_code);

        if is_retryable(&failure, &self.policy) {
            record.finish(RecordOutcome::Exhausted);
            error!(
                attempts = attempt,
                category = %failure.category,
                status = ?failure.status_code,
                elapsed_ms = u64::try_from(record.elapsed().as_millis()).unwrap_or(u64::MAX),
                "retries exhausted"
            );
            RetryError::Exhausted {
                cause: failure.cause,
                record,
            }
        } else {
            record.finish(RecordOutcome::NonRetryable);
            error!(
                attempts = attempt,
                category = %failure.category,
                status = ?failure.status_code,
                "non-retryable failure"
            );
            RetryError::NonRetryable {
                cause: failure.cause,
                record,
            }
        }
    }

    fn cancelled<E>(mut record: RetryRecord, last_error: Option<E>) -> RetryError<E> {
        transition(ExecutorState::Terminated, record.attempts());
        record.finish(RecordOutcome::Cancelled);
        info!(attempts = record.attempts(), "execution cancelled");
        RetryError::Cancelled { last_error, record }
    }

    fn calculator(&self) -> BackoffCalculator {
        match self.jitter_seed {
            Some(seed) => BackoffCalculator::seeded(seed),
            None => BackoffCalculator::new(),
        }
    }
}

fn transition(state: ExecutorState, attempt: u32) {
    trace!(?state, attempt, "state transition");
}

fn classify_with_trait<E: Classify>(error: &E) -> (ErrorCategory, Option<u16>) {
    (error.category(), error.status_code())
}
