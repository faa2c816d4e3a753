//! Per-execution attempt history.

use std::time::Duration;

use tokio::time::Instant;

use crate::retry::classify::{AttemptFailure, ErrorCategory};
use crate::retry::policy::BackoffKind;

/// What happened on one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptEntry {
    /// Attempt number (1-indexed, initial attempt included).
    pub attempt: u32,
    /// Failure category; `None` when the attempt succeeded.
    pub category: Option<ErrorCategory>,
    /// HTTP status of the failure, if any.
    pub status_code: Option<u16>,
    /// Strategy used for the wait that followed, if the attempt was retried.
    pub strategy: Option<BackoffKind>,
    /// Wait that followed, if the attempt was retried.
    pub delay: Option<Duration>,
}

impl AttemptEntry {
    /// Returns true if this attempt failed.
    pub fn is_failure(&self) -> bool {
        self.category.is_some()
    }
}

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Still running.
    Pending,
    /// An attempt succeeded.
    Succeeded,
    /// A failure the policy does not retry.
    NonRetryable,
    /// Every allowed attempt failed.
    Exhausted,
    /// Cancelled before completion.
    Cancelled,
}

/// History of one execution: every attempt, every wait, and the outcome.
///
/// Owned by the execution that created it and handed to the caller with the
/// final result, so the full history can be inspected without re-running.
/// It also carries the delay chain decorrelated jitter feeds on.
#[derive(Debug, Clone)]
pub struct RetryRecord {
    operation: String,
    started: Instant,
    entries: Vec<AttemptEntry>,
    outcome: RecordOutcome,
    elapsed: Option<Duration>,
}

impl RetryRecord {
    /// Start a record for `operation`.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            started: Instant::now(),
            entries: Vec::new(),
            outcome: RecordOutcome::Pending,
            elapsed: None,
        }
    }

    /// Operation identifier.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Number of attempts made.
    pub fn attempts(&self) -> u32 {
        u32::try_from(self.entries.len()).unwrap_or(u32::MAX)
    }

    /// Number of retries made (attempts after the first).
    pub fn retries(&self) -> u32 {
        self.attempts().saturating_sub(1)
    }

    /// Every attempt, in order.
    pub fn entries(&self) -> &[AttemptEntry] {
        &self.entries
    }

    /// Categories of the failed attempts, in order.
    pub fn error_categories(&self) -> Vec<ErrorCategory> {
        self.entries.iter().filter_map(|e| e.category).collect()
    }

    /// Delays waited between attempts, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.entries.iter().filter_map(|e| e.delay).collect()
    }

    /// Most recent delay, if any wait has happened.
    pub fn last_delay(&self) -> Option<Duration> {
        self.entries.iter().rev().find_map(|e| e.delay)
    }

    /// Sum of every delay.
    pub fn total_delay(&self) -> Duration {
        self.entries.iter().filter_map(|e| e.delay).sum()
    }

    /// How the execution ended.
    pub fn outcome(&self) -> RecordOutcome {
        self.outcome
    }

    /// Time from the first attempt to completion, or so far if the execution
    /// is still pending. Measured on the tokio clock the executor sleeps on.
    pub fn elapsed(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.started.elapsed())
    }

    pub(crate) fn push_success(&mut self, attempt: u32) {
        self.entries.push(AttemptEntry {
            attempt,
            category: None,
            status_code: None,
            strategy: None,
            delay: None,
        });
    }

    pub(crate) fn push_failure<E>(
        &mut self,
        attempt: u32,
        failure: &AttemptFailure<E>,
        wait: Option<(BackoffKind, Duration)>,
    ) {
        self.entries.push(AttemptEntry {
            attempt,
            category: Some(failure.category),
            status_code: failure.status_code,
            strategy: wait.map(|(kind, _)| kind),
            delay: wait.map(|(_, delay)| delay),
        });
    }

    pub(crate) fn finish(&mut self, outcome: RecordOutcome) {
        self.outcome = outcome;
        self.elapsed = Some(self.started.elapsed());
    }
}
