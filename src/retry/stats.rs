//! Retry statistics shared across concurrent executions.
//!
//! Every counter is an `AtomicU64` and is only ever changed with
//! `fetch_add`, so any number of executors can record into one
//! [`RetryStatistics`] without locks and without lost updates.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::retry::classify::ErrorCategory;
use crate::retry::policy::BackoffKind;

const MIN_STATUS: u16 = 100;
const MAX_STATUS: u16 = 599;
const STATUS_SLOTS: usize = (MAX_STATUS - MIN_STATUS + 1) as usize;

/// Cumulative retry counters for a test run or session.
///
/// Create one per session, share it behind an `Arc`, and call
/// [`reset`](Self::reset) between sessions.
///
/// Retry, status and category counters are updated as each wait begins, so
/// they include executions that were later cancelled. Those executions never
/// reach `total_requests`.
///
/// # Examples
///
/// ```rust
/// use rebound::{BackoffKind, ErrorCategory, RetryStatistics};
///
/// let stats = RetryStatistics::new();
/// stats.record_retry(ErrorCategory::ServerError, Some(503), BackoffKind::Exponential);
/// stats.record_success(2);
///
/// let snapshot = stats.get_aggregate_statistics();
/// assert_eq!(snapshot.total_requests, 1);
/// assert_eq!(snapshot.successful_retries, 1);
/// assert_eq!(snapshot.retry_percentage(), 100.0);
/// ```
pub struct RetryStatistics {
    total_requests: AtomicU64,
    requests_with_retries: AtomicU64,
    total_retry_attempts: AtomicU64,
    successful_retries: AtomicU64,
    failed_retries: AtomicU64,
    by_status: Box<[AtomicU64]>,
    other_status: AtomicU64,
    by_category: [AtomicU64; ErrorCategory::COUNT],
    by_strategy: [AtomicU64; BackoffKind::COUNT],
}

impl RetryStatistics {
    /// Fresh statistics with every counter at zero.
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            requests_with_retries: AtomicU64::new(0),
            total_retry_attempts: AtomicU64::new(0),
            successful_retries: AtomicU64::new(0),
            failed_retries: AtomicU64::new(0),
            by_status: (0..STATUS_SLOTS).map(|_| AtomicU64::new(0)).collect(),
            other_status: AtomicU64::new(0),
            by_category: std::array::from_fn(|_| AtomicU64::new(0)),
            by_strategy: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Record a failed attempt that will be retried after a wait computed
    /// with `strategy`.
    pub fn record_retry(&self, category: ErrorCategory, status: Option<u16>, strategy: BackoffKind) {
        self.total_retry_attempts.fetch_add(1, Ordering::Relaxed);
        self.record_failure_kind(category, status);
        self.by_strategy[strategy.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Record an execution that succeeded on attempt `attempts`.
    pub fn record_success(&self, attempts: u32) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if attempts > 1 {
            self.requests_with_retries.fetch_add(1, Ordering::Relaxed);
            self.successful_retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an execution whose final attempt, number `attempts`, failed.
    pub fn record_failure(&self, attempts: u32, category: ErrorCategory, status: Option<u16>) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.record_failure_kind(category, status);
        if attempts > 1 {
            self.requests_with_retries.fetch_add(1, Ordering::Relaxed);
            self.failed_retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_failure_kind(&self, category: ErrorCategory, status: Option<u16>) {
        self.by_category[category.index()].fetch_add(1, Ordering::Relaxed);
        if let Some(code) = status {
            self.status_slot(code).fetch_add(1, Ordering::Relaxed);
        }
    }

    fn status_slot(&self, code: u16) -> &AtomicU64 {
        if (MIN_STATUS..=MAX_STATUS).contains(&code) {
            &self.by_status[usize::from(code - MIN_STATUS)]
        } else {
            &self.other_status
        }
    }

    /// Executions completed (successes plus terminal failures).
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Executions that needed at least one retry.
    pub fn requests_with_retries(&self) -> u64 {
        self.requests_with_retries.load(Ordering::Relaxed)
    }

    /// Retries performed across all executions.
    pub fn total_retry_attempts(&self) -> u64 {
        self.total_retry_attempts.load(Ordering::Relaxed)
    }

    /// Executions that succeeded after retrying.
    pub fn successful_retries(&self) -> u64 {
        self.successful_retries.load(Ordering::Relaxed)
    }

    /// Executions that failed after retrying.
    pub fn failed_retries(&self) -> u64 {
        self.failed_retries.load(Ordering::Relaxed)
    }

    /// Failed attempts observed with HTTP status `code`.
    pub fn status_count(&self, code: u16) -> u64 {
        self.status_slot(code).load(Ordering::Relaxed)
    }

    /// Failed attempts observed in `category`.
    pub fn category_count(&self, category: ErrorCategory) -> u64 {
        self.by_category[category.index()].load(Ordering::Relaxed)
    }

    /// Waits computed with `strategy`.
    pub fn strategy_count(&self, strategy: BackoffKind) -> u64 {
        self.by_strategy[strategy.index()].load(Ordering::Relaxed)
    }

    /// Immutable snapshot of every counter plus derived percentages.
    ///
    /// Counters are read one by one; take snapshots at quiet points if exact
    /// cross-counter consistency matters.
    pub fn get_aggregate_statistics(&self) -> AggregateStatistics {
        let by_status_code = self
            .by_status
            .iter()
            .zip(MIN_STATUS..=MAX_STATUS)
            .filter_map(|(count, code)| {
                let n = count.load(Ordering::Relaxed);
                (n > 0).then_some((code, n))
            })
            .collect();
        let by_category = ErrorCategory::ALL
            .into_iter()
            .filter_map(|c| {
                let n = self.category_count(c);
                (n > 0).then_some((c, n))
            })
            .collect();
        let by_strategy = BackoffKind::ALL
            .into_iter()
            .filter_map(|k| {
                let n = self.strategy_count(k);
                (n > 0).then_some((k, n))
            })
            .collect();

        AggregateStatistics {
            total_requests: self.total_requests(),
            requests_with_retries: self.requests_with_retries(),
            total_retry_attempts: self.total_retry_attempts(),
            successful_retries: self.successful_retries(),
            failed_retries: self.failed_retries(),
            by_status_code,
            other_status_codes: self.other_status.load(Ordering::Relaxed),
            by_category,
            by_strategy,
        }
    }

    /// Zero every counter.
    ///
    /// Call at session boundaries only, never while executions are recording.
    pub fn reset(&self) {
        let scalars = [
            &self.total_requests,
            &self.requests_with_retries,
            &self.total_retry_attempts,
            &self.successful_retries,
            &self.failed_retries,
            &self.other_status,
        ];
        scalars
            .into_iter()
            .chain(self.by_status.iter())
            .chain(self.by_category.iter())
            .chain(self.by_strategy.iter())
            .for_each(|counter| counter.store(0, Ordering::Relaxed));
    }
}

impl Default for RetryStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RetryStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryStatistics")
            .field("total_requests", &self.total_requests())
            .field("requests_with_retries", &self.requests_with_retries())
            .field("total_retry_attempts", &self.total_retry_attempts())
            .field("successful_retries", &self.successful_retries())
            .field("failed_retries", &self.failed_retries())
            .finish_non_exhaustive()
    }
}

/// A value in the flattened statistics map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    /// A raw counter.
    Count(u64),
    /// A derived percentage in `[0, 100]`.
    Percentage(f64),
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatValue::Count(n) => write!(f, "{}", n),
            StatValue::Percentage(p) => write!(f, "{:.2}%", p),
        }
    }
}

/// Point-in-time copy of [`RetryStatistics`].
///
/// Keyed maps only contain non-zero entries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AggregateStatistics {
    /// Executions completed.
    pub total_requests: u64,
    /// Executions that needed at least one retry.
    pub requests_with_retries: u64,
    /// Retries performed.
    pub total_retry_attempts: u64,
    /// Executions that succeeded after retrying.
    pub successful_retries: u64,
    /// Executions that failed after retrying.
    pub failed_retries: u64,
    /// Failed attempts per HTTP status.
    pub by_status_code: BTreeMap<u16, u64>,
    /// Failed attempts whose status fell outside 100..=599.
    pub other_status_codes: u64,
    /// Failed attempts per category.
    pub by_category: BTreeMap<ErrorCategory, u64>,
    /// Waits per backoff strategy.
    pub by_strategy: BTreeMap<BackoffKind, u64>,
}

impl AggregateStatistics {
    /// `requests_with_retries / total_requests * 100`, or 0 with no requests.
    pub fn retry_percentage(&self) -> f64 {
        percentage(self.requests_with_retries, self.total_requests)
    }

    /// `successful_retries / total_retry_attempts * 100`, or 0 with no retries.
    pub fn retry_success_rate(&self) -> f64 {
        percentage(self.successful_retries, self.total_retry_attempts)
    }

    /// Flatten into a label → value map for attaching to external reports.
    ///
    /// Keyed counters appear as `status.<code>`, `category.<NAME>` and
    /// `strategy.<NAME>`.
    pub fn to_map(&self) -> BTreeMap<String, StatValue> {
        let mut map = BTreeMap::new();
        let scalars = [
            ("total_requests", self.total_requests),
            ("requests_with_retries", self.requests_with_retries),
            ("total_retry_attempts", self.total_retry_attempts),
            ("successful_retries", self.successful_retries),
            ("failed_retries", self.failed_retries),
        ];
        for (label, value) in scalars {
            map.insert(label.to_string(), StatValue::Count(value));
        }
        map.insert(
            "retry_percentage".to_string(),
            StatValue::Percentage(self.retry_percentage()),
        );
        map.insert(
            "retry_success_rate".to_string(),
            StatValue::Percentage(self.retry_success_rate()),
        );
        for (code, n) in &self.by_status_code {
            map.insert(format!("status.{}", code), StatValue::Count(*n));
        }
        if self.other_status_codes > 0 {
            map.insert(
                "status.other".to_string(),
                StatValue::Count(self.other_status_codes),
            );
        }
        for (category, n) in &self.by_category {
            map.insert(format!("category.{}", category), StatValue::Count(*n));
        }
        for (strategy, n) in &self.by_strategy {
            map.insert(format!("strategy.{}", strategy), StatValue::Count(*n));
        }
        map
    }
}

fn percentage(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_statistics_are_zero() {
        let stats = RetryStatistics::new();
        let snapshot = stats.get_aggregate_statistics();
        assert_eq!(snapshot, AggregateStatistics::default());
        assert_eq!(snapshot.retry_percentage(), 0.0);
        assert_eq!(snapshot.retry_success_rate(), 0.0);
    }

    #[test]
    fn test_success_without_retry() {
        let stats = RetryStatistics::new();
        stats.record_success(1);
        assert_eq!(stats.total_requests(), 1);
        assert_eq!(stats.requests_with_retries(), 0);
        assert_eq!(stats.successful_retries(), 0);
    }

    #[test]
    fn test_success_after_retries() {
        let stats = RetryStatistics::new();
        stats.record_retry(ErrorCategory::ServerError, Some(503), BackoffKind::Exponential);
        stats.record_retry(ErrorCategory::ClientThrottled, Some(429), BackoffKind::DecorrelatedJitter);
        stats.record_success(3);

        let s = stats.get_aggregate_statistics();
        assert_eq!(s.total_requests, 1);
        assert_eq!(s.requests_with_retries, 1);
        assert_eq!(s.total_retry_attempts, 2);
        assert_eq!(s.successful_retries, 1);
        assert_eq!(s.failed_retries, 0);
        assert_eq!(s.by_status_code.get(&503), Some(&1));
        assert_eq!(s.by_status_code.get(&429), Some(&1));
        assert_eq!(s.by_strategy.get(&BackoffKind::Exponential), Some(&1));
        assert_eq!(s.retry_success_rate(), 50.0);
    }

    #[test]
    fn test_terminal_failure_counts_its_attempt() {
        let stats = RetryStatistics::new();
        stats.record_retry(ErrorCategory::NetworkTimeout, None, BackoffKind::Fixed);
        stats.record_failure(2, ErrorCategory::NetworkTimeout, None);

        assert_eq!(stats.category_count(ErrorCategory::NetworkTimeout), 2);
        assert_eq!(stats.failed_retries(), 1);
        assert_eq!(stats.strategy_count(BackoffKind::Fixed), 1);
    }

    #[test]
    fn test_out_of_range_status_goes_to_other() {
        let stats = RetryStatistics::new();
        stats.record_failure(1, ErrorCategory::Unknown, Some(999));

        assert_eq!(stats.status_count(999), 1);
        let map = stats.get_aggregate_statistics().to_map();
        assert_eq!(map.get("status.other"), Some(&StatValue::Count(1)));
    }

    #[test]
    fn test_to_map_labels() {
        let stats = RetryStatistics::new();
        stats.record_retry(ErrorCategory::ClientThrottled, Some(429), BackoffKind::DecorrelatedJitter);
        stats.record_success(2);
        stats.record_success(1);

        let map = stats.get_aggregate_statistics().to_map();
        assert_eq!(map.get("total_requests"), Some(&StatValue::Count(2)));
        assert_eq!(map.get("retry_percentage"), Some(&StatValue::Percentage(50.0)));
        assert_eq!(map.get("retry_success_rate"), Some(&StatValue::Percentage(100.0)));
        assert_eq!(map.get("status.429"), Some(&StatValue::Count(1)));
        assert_eq!(map.get("category.CLIENT_THROTTLED"), Some(&StatValue::Count(1)));
        assert_eq!(map.get("strategy.DECORRELATED_JITTER"), Some(&StatValue::Count(1)));
        assert!(!map.contains_key("status.other"));
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let stats = RetryStatistics::new();
        stats.record_retry(ErrorCategory::ServerError, Some(500), BackoffKind::Linear);
        stats.record_failure(2, ErrorCategory::ServerError, Some(1_000));
        stats.reset();

        assert_eq!(stats.get_aggregate_statistics(), AggregateStatistics::default());
    }

    #[test]
    fn test_snapshot_serializes_for_reports() {
        let stats = RetryStatistics::new();
        stats.record_retry(ErrorCategory::ServerError, Some(502), BackoffKind::Fibonacci);
        stats.record_success(2);

        let snapshot = stats.get_aggregate_statistics();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["total_requests"], 1);
        assert_eq!(json["by_status_code"]["502"], 1);
        assert_eq!(json["by_category"]["SERVER_ERROR"], 1);
        assert_eq!(json["by_strategy"]["FIBONACCI"], 1);

        let flat = serde_json::to_value(snapshot.to_map()).unwrap();
        assert_eq!(flat["retry_percentage"], 100.0);
        assert_eq!(flat["status.502"], 1);
    }

    #[test]
    fn test_stat_value_display() {
        assert_eq!(StatValue::Count(3).to_string(), "3");
        assert_eq!(StatValue::Percentage(12.5).to_string(), "12.50%");
    }
}
