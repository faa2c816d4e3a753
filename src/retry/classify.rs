//! Classify failed attempts and decide whether they are worth retrying.

use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::retry::error::PolicyError;
use crate::retry::policy::{BackoffKind, RetryPolicy};

/// Closed classification of why an attempt failed.
///
/// Categories come from the transport error type or the HTTP status, never
/// from message text. Names follow the configuration surface
/// (`CONNECTION_ERROR`, `CLIENT_THROTTLED`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Connection refused, reset or dropped.
    ConnectionError,
    /// Connect or read timeout, or HTTP 408.
    NetworkTimeout,
    /// Host name could not be resolved.
    DnsResolutionError,
    /// TLS handshake or certificate failure.
    SslError,
    /// The server asked us to slow down (HTTP 429).
    ClientThrottled,
    /// HTTP 5xx.
    ServerError,
    /// HTTP 4xx other than throttling and timeouts.
    ClientError,
    /// Anything else.
    Unknown,
}

impl ErrorCategory {
    /// Number of variants.
    pub const COUNT: usize = 8;

    /// Every category, in declaration order.
    pub const ALL: [ErrorCategory; Self::COUNT] = [
        ErrorCategory::ConnectionError,
        ErrorCategory::NetworkTimeout,
        ErrorCategory::DnsResolutionError,
        ErrorCategory::SslError,
        ErrorCategory::ClientThrottled,
        ErrorCategory::ServerError,
        ErrorCategory::ClientError,
        ErrorCategory::Unknown,
    ];

    /// Configuration name of this category.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::ConnectionError => "CONNECTION_ERROR",
            ErrorCategory::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCategory::DnsResolutionError => "DNS_RESOLUTION_ERROR",
            ErrorCategory::SslError => "SSL_ERROR",
            ErrorCategory::ClientThrottled => "CLIENT_THROTTLED",
            ErrorCategory::ServerError => "SERVER_ERROR",
            ErrorCategory::ClientError => "CLIENT_ERROR",
            ErrorCategory::Unknown => "UNKNOWN",
        }
    }

    /// Category implied by an HTTP status code alone.
    pub fn from_status(code: u16) -> Self {
        match code {
            429 => ErrorCategory::ClientThrottled,
            408 => ErrorCategory::NetworkTimeout,
            500..=599 => ErrorCategory::ServerError,
            400..=499 => ErrorCategory::ClientError,
            _ => ErrorCategory::Unknown,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        ErrorCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| PolicyError::UnknownCategory(s.trim().to_string()))
    }
}

/// Maps an operation's error type onto the retry vocabulary.
///
/// Implemented by the transport layer for its own error type; the executor
/// treats the answers as opaque data.
pub trait Classify {
    /// Root-cause category of this error.
    fn category(&self) -> ErrorCategory;

    /// HTTP status code, when the failure carried one.
    fn status_code(&self) -> Option<u16> {
        None
    }
}

impl Classify for io::Error {
    fn category(&self) -> ErrorCategory {
        match self.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => ErrorCategory::ConnectionError,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorCategory::NetworkTimeout,
            _ => ErrorCategory::Unknown,
        }
    }
}

/// A classified failure of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure<E> {
    /// Root-cause category.
    pub category: ErrorCategory,
    /// HTTP status, if any.
    pub status_code: Option<u16>,
    /// The error the operation returned.
    pub cause: E,
}

impl<E> AttemptFailure<E> {
    /// Create a failure from already-classified parts.
    pub fn new(category: ErrorCategory, status_code: Option<u16>, cause: E) -> Self {
        Self {
            category,
            status_code,
            cause,
        }
    }

    /// Classify `cause` through its [`Classify`] impl.
    pub fn classify(cause: E) -> Self
    where
        E: Classify,
    {
        Self::new(cause.category(), cause.status_code(), cause)
    }
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome<T, E> {
    /// The operation produced a value.
    Success(T),
    /// The operation failed.
    Failure(AttemptFailure<E>),
}

impl<T, E> AttemptOutcome<T, E> {
    /// Returns true for [`AttemptOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success(_))
    }

    /// The failure, if this attempt failed.
    pub fn failure(&self) -> Option<&AttemptFailure<E>> {
        match self {
            AttemptOutcome::Success(_) => None,
            AttemptOutcome::Failure(failure) => Some(failure),
        }
    }
}

/// Whether the policy regards this kind of failure as transient, ignoring
/// how many attempts have been made.
///
/// A whitelisted status code wins over the category.
pub fn is_retryable<E>(failure: &AttemptFailure<E>, policy: &RetryPolicy) -> bool {
    if let Some(code) = failure.status_code {
        if policy.is_retryable_status(code) {
            return true;
        }
    }
    policy.is_retryable_category(failure.category)
}

/// Decide whether to make another attempt after `attempt` (1-based, the
/// initial try included) produced `outcome`.
///
/// Rules, in order: retries exhausted stops; success stops; a whitelisted
/// status code retries; a whitelisted category retries; anything else stops.
///
/// ```rust
/// use rebound::{should_retry, AttemptFailure, AttemptOutcome, ErrorCategory, RetryPolicy};
///
/// let policy = RetryPolicy::builder().max_retries(2).build().unwrap();
/// let throttled: AttemptOutcome<(), _> =
///     AttemptOutcome::Failure(AttemptFailure::new(ErrorCategory::ClientThrottled, Some(429), "slow down"));
///
/// assert!(should_retry(&throttled, 1, &policy));
/// assert!(should_retry(&throttled, 2, &policy));
/// assert!(!should_retry(&throttled, 3, &policy));
/// ```
pub fn should_retry<T, E>(outcome: &AttemptOutcome<T, E>, attempt: u32, policy: &RetryPolicy) -> bool {
    if attempt > policy.max_retries() {
        return false;
    }
    match outcome {
        AttemptOutcome::Success(_) => false,
        AttemptOutcome::Failure(failure) => is_retryable(failure, policy),
    }
}

/// Backoff algorithm to use after `failure`.
pub fn resolve_strategy<E>(failure: &AttemptFailure<E>, policy: &RetryPolicy) -> BackoffKind {
    policy.strategy_for(failure.category)
}
