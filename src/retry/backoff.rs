//! Delay computation for every [`BackoffKind`].
//!
//! The deterministic algorithms are plain functions of `(kind, attempt,
//! policy)`; see [`base_delay`]. The jittered ones draw from the random
//! source owned by a [`BackoffCalculator`], which can be seeded so that tests
//! reproduce an exact delay sequence.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::retry::policy::{BackoffKind, RetryPolicy};

/// Deterministic part of the delay before retry number `attempt` (1-based).
///
/// For the jittered exponential kinds this is the exponential delay the
/// jitter is drawn from; for decorrelated jitter it is the initial delay.
/// The result is clamped to `policy.max_delay()`.
///
/// ```rust
/// use rebound::{base_delay, BackoffKind, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::builder().initial_delay_ms(1_000).build().unwrap();
///
/// assert_eq!(base_delay(BackoffKind::Exponential, 1, &policy), Duration::from_secs(1));
/// assert_eq!(base_delay(BackoffKind::Exponential, 2, &policy), Duration::from_secs(2));
/// assert_eq!(base_delay(BackoffKind::Exponential, 3, &policy), Duration::from_secs(4));
/// ```
pub fn base_delay(kind: BackoffKind, attempt: u32, policy: &RetryPolicy) -> Duration {
    let attempt = attempt.max(1);
    let initial = policy.initial_delay();
    let raw = match kind {
        BackoffKind::Fixed | BackoffKind::DecorrelatedJitter => initial,
        BackoffKind::Linear => initial.saturating_mul(attempt),
        BackoffKind::Exponential
        | BackoffKind::ExponentialWithFullJitter
        | BackoffKind::ExponentialWithEqualJitter => {
            initial.saturating_mul(2u32.saturating_pow(attempt - 1))
        }
        BackoffKind::Fibonacci => initial.saturating_mul(fibonacci(attempt)),
    };
    raw.min(policy.max_delay())
}

/// Calculate the nth Fibonacci number, with `fib(1) = fib(2) = 1`.
///
/// Saturates at `u32::MAX` instead of overflowing.
pub fn fibonacci(n: u32) -> u32 {
    if n == 0 {
        return 0;
    }
    let mut a = 0u32;
    let mut b = 1u32;
    for _ in 1..n {
        let temp = a.saturating_add(b);
        a = b;
        b = temp;
    }
    b
}

/// Computes retry delays, owning the random source used for jitter.
///
/// Each execution should own its calculator; nothing here is shared.
///
/// # Examples
///
/// ```rust
/// use rebound::{BackoffCalculator, BackoffKind, RetryPolicy};
///
/// let policy = RetryPolicy::builder()
///     .initial_delay_ms(100)
///     .max_delay_ms(5_000)
///     .backoff_strategy(BackoffKind::ExponentialWithFullJitter)
///     .build()
///     .unwrap();
///
/// let mut a = BackoffCalculator::seeded(7);
/// let mut b = BackoffCalculator::seeded(7);
/// for attempt in 1..=5 {
///     let delay = a.delay(attempt, &policy);
///     assert_eq!(delay, b.delay(attempt, &policy));
///     assert!(delay <= policy.max_delay());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct BackoffCalculator<R = StdRng> {
    rng: R,
}

impl BackoffCalculator<StdRng> {
    /// Calculator seeded from the operating system.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Calculator with a fixed seed, for reproducible jitter.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl Default for BackoffCalculator<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> BackoffCalculator<R> {
    /// Calculator drawing jitter from `rng`.
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Delay before retry `attempt` using the policy's default strategy and
    /// no delay history.
    pub fn delay(&mut self, attempt: u32, policy: &RetryPolicy) -> Duration {
        self.delay_for(policy.strategy(), attempt, None, policy)
    }

    /// Delay before retry `attempt` (1-based) using `kind`.
    ///
    /// `previous` is the delay computed for the prior retry and only matters
    /// for [`BackoffKind::DecorrelatedJitter`]; `None` means the initial
    /// delay. The result always lies in `[0, policy.max_delay()]`.
    pub fn delay_for(
        &mut self,
        kind: BackoffKind,
        attempt: u32,
        previous: Option<Duration>,
        policy: &RetryPolicy,
    ) -> Duration {
        let base = base_delay(kind, attempt, policy);
        let delay = match kind {
            BackoffKind::Fixed
            | BackoffKind::Linear
            | BackoffKind::Exponential
            | BackoffKind::Fibonacci => base,
            BackoffKind::ExponentialWithFullJitter => self.uniform(Duration::ZERO, base),
            BackoffKind::ExponentialWithEqualJitter => {
                let half = base / 2;
                half + self.uniform(Duration::ZERO, half)
            }
            BackoffKind::DecorrelatedJitter => {
                let prev = previous.unwrap_or(policy.initial_delay());
                self.uniform(policy.initial_delay(), prev.saturating_mul(3))
            }
        };
        delay.min(policy.max_delay())
    }

    fn uniform(&mut self, low: Duration, high: Duration) -> Duration {
        if high <= low {
            return low;
        }
        let low = as_nanos(low);
        let high = as_nanos(high);
        Duration::from_nanos(self.rng.random_range(low..=high))
    }
}

fn as_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
