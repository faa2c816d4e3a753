//! Retry policy types and configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::classify::ErrorCategory;
use crate::retry::error::PolicyError;

/// Default number of retries beyond the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1_000);
/// Default upper bound on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);
/// Status codes retried when no explicit list is configured.
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];
/// Error categories retried when no explicit list is configured.
pub const DEFAULT_RETRYABLE_CATEGORIES: [ErrorCategory; 5] = [
    ErrorCategory::ConnectionError,
    ErrorCategory::NetworkTimeout,
    ErrorCategory::DnsResolutionError,
    ErrorCategory::ClientThrottled,
    ErrorCategory::ServerError,
];

/// The algorithm used to grow the delay between attempts.
///
/// Names follow the configuration surface (`EXPONENTIAL`,
/// `DECORRELATED_JITTER`, ...), both for serde and [`FromStr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackoffKind {
    /// Same delay for every retry.
    Fixed,
    /// Delay = initial * attempt.
    Linear,
    /// Delay = initial * 2^(attempt - 1).
    Exponential,
    /// Delay = initial * fib(attempt).
    Fibonacci,
    /// Uniformly random between zero and the exponential delay.
    ExponentialWithFullJitter,
    /// Half the exponential delay plus a random share of the other half.
    ExponentialWithEqualJitter,
    /// Random between the initial delay and three times the previous delay.
    DecorrelatedJitter,
}

impl BackoffKind {
    /// Number of variants.
    pub const COUNT: usize = 7;

    /// Every backoff kind, in declaration order.
    pub const ALL: [BackoffKind; Self::COUNT] = [
        BackoffKind::Fixed,
        BackoffKind::Linear,
        BackoffKind::Exponential,
        BackoffKind::Fibonacci,
        BackoffKind::ExponentialWithFullJitter,
        BackoffKind::ExponentialWithEqualJitter,
        BackoffKind::DecorrelatedJitter,
    ];

    /// Configuration name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            BackoffKind::Fixed => "FIXED",
            BackoffKind::Linear => "LINEAR",
            BackoffKind::Exponential => "EXPONENTIAL",
            BackoffKind::Fibonacci => "FIBONACCI",
            BackoffKind::ExponentialWithFullJitter => "EXPONENTIAL_WITH_FULL_JITTER",
            BackoffKind::ExponentialWithEqualJitter => "EXPONENTIAL_WITH_EQUAL_JITTER",
            BackoffKind::DecorrelatedJitter => "DECORRELATED_JITTER",
        }
    }

    /// Whether this kind draws from the random source.
    pub fn is_jittered(self) -> bool {
        matches!(
            self,
            BackoffKind::ExponentialWithFullJitter
                | BackoffKind::ExponentialWithEqualJitter
                | BackoffKind::DecorrelatedJitter
        )
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackoffKind {
    type Err = PolicyError;

    /// Parses a configuration name. Case and `-`/`_` are not significant.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        BackoffKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| PolicyError::UnknownStrategy(s.trim().to_string()))
    }
}

/// An immutable retry policy.
///
/// Policies are pure data: they describe retry limits, delays and which
/// failures are worth retrying, but never execute anything. Once built a
/// policy cannot change, so one instance can be shared (typically behind an
/// `Arc`) by any number of concurrent executions.
///
/// `max_retries` bounds the number of *extra* attempts: `max_retries(3)`
/// allows up to 4 attempts in total.
///
/// # Examples
///
/// ```rust
/// use rebound::{BackoffKind, ErrorCategory, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::builder()
///     .max_retries(5)
///     .initial_delay_ms(200)
///     .max_delay_ms(10_000)
///     .backoff_strategy(BackoffKind::Exponential)
///     .error_specific_backoff(ErrorCategory::ClientThrottled, BackoffKind::DecorrelatedJitter)
///     .build()
///     .unwrap();
///
/// assert_eq!(policy.max_retries(), 5);
/// assert_eq!(policy.initial_delay(), Duration::from_millis(200));
/// assert_eq!(
///     policy.strategy_for(ErrorCategory::ClientThrottled),
///     BackoffKind::DecorrelatedJitter
/// );
/// assert_eq!(policy.strategy_for(ErrorCategory::NetworkTimeout), BackoffKind::Exponential);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    strategy: BackoffKind,
    retryable_status_codes: BTreeSet<u16>,
    retryable_error_categories: BTreeSet<ErrorCategory>,
    per_category_strategy: BTreeMap<ErrorCategory, BackoffKind>,
}

impl RetryPolicy {
    /// Start building a policy from the defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Maximum number of retries after the initial attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Maximum number of attempts, the initial one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the first retry; the unit every algorithm scales.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Upper bound on any computed delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Default backoff algorithm.
    pub fn strategy(&self) -> BackoffKind {
        self.strategy
    }

    /// HTTP status codes that are retried.
    pub fn retryable_status_codes(&self) -> &BTreeSet<u16> {
        &self.retryable_status_codes
    }

    /// Error categories that are retried.
    pub fn retryable_error_categories(&self) -> &BTreeSet<ErrorCategory> {
        &self.retryable_error_categories
    }

    /// Per-category overrides of the backoff algorithm.
    pub fn per_category_strategy(&self) -> &BTreeMap<ErrorCategory, BackoffKind> {
        &self.per_category_strategy
    }

    /// Whether `code` is configured as retryable.
    pub fn is_retryable_status(&self, code: u16) -> bool {
        self.retryable_status_codes.contains(&code)
    }

    /// Whether `category` is configured as retryable.
    pub fn is_retryable_category(&self, category: ErrorCategory) -> bool {
        self.retryable_error_categories.contains(&category)
    }

    /// Backoff algorithm for failures of `category`: the override if one is
    /// configured, otherwise the default strategy.
    pub fn strategy_for(&self, category: ErrorCategory) -> BackoffKind {
        self.per_category_strategy
            .get(&category)
            .copied()
            .unwrap_or(self.strategy)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicyBuilder::default().build_unchecked()
    }
}

/// Builder for [`RetryPolicy`].
///
/// Starts from the crate defaults (3 retries, 1s initial delay, 30s cap,
/// exponential backoff, the common transient status codes and categories).
/// Collection setters replace the default set; the singular setters add to it.
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    strategy: BackoffKind,
    retryable_status_codes: BTreeSet<u16>,
    retryable_error_categories: BTreeSet<ErrorCategory>,
    per_category_strategy: BTreeMap<ErrorCategory, BackoffKind>,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            strategy: BackoffKind::Exponential,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
            retryable_error_categories: DEFAULT_RETRYABLE_CATEGORIES.into_iter().collect(),
            per_category_strategy: BTreeMap::new(),
        }
    }
}

impl RetryPolicyBuilder {
    /// Set the maximum number of retries (not counting the initial attempt).
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the initial delay.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the initial delay in milliseconds.
    pub fn initial_delay_ms(self, ms: u64) -> Self {
        self.initial_delay(Duration::from_millis(ms))
    }

    /// Set the delay cap.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the delay cap in milliseconds.
    pub fn max_delay_ms(self, ms: u64) -> Self {
        self.max_delay(Duration::from_millis(ms))
    }

    /// Set the default backoff algorithm.
    pub fn backoff_strategy(mut self, kind: BackoffKind) -> Self {
        self.strategy = kind;
        self
    }

    /// Replace the retryable status codes.
    pub fn retryable_status_codes<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    /// Add one retryable status code.
    pub fn retryable_status_code(mut self, code: u16) -> Self {
        self.retryable_status_codes.insert(code);
        self
    }

    /// Replace the retryable error categories.
    pub fn retryable_error_codes<I>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = ErrorCategory>,
    {
        self.retryable_error_categories = categories.into_iter().collect();
        self
    }

    /// Add one retryable error category.
    pub fn retryable_error_code(mut self, category: ErrorCategory) -> Self {
        self.retryable_error_categories.insert(category);
        self
    }

    /// Use `kind` instead of the default strategy for failures of `category`.
    pub fn error_specific_backoff(mut self, category: ErrorCategory, kind: BackoffKind) -> Self {
        self.per_category_strategy.insert(category, kind);
        self
    }

    /// Validate and build the policy.
    ///
    /// Fails when the initial delay is zero or the cap is below it.
    pub fn build(self) -> Result<RetryPolicy, PolicyError> {
        if self.initial_delay.is_zero() {
            return Err(PolicyError::ZeroInitialDelay);
        }
        if self.max_delay < self.initial_delay {
            return Err(PolicyError::MaxDelayBelowInitial {
                initial: self.initial_delay,
                max: self.max_delay,
            });
        }
        Ok(self.build_unchecked())
    }

    fn build_unchecked(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            strategy: self.strategy,
            retryable_status_codes: self.retryable_status_codes,
            retryable_error_categories: self.retryable_error_categories,
            per_category_strategy: self.per_category_strategy,
        }
    }
}
