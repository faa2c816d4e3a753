//! Loading retry policies from configuration.
//!
//! Settings live under dotted keys with the `connection.retry.` prefix:
//!
//! ```toml
//! [connection.retry]
//! max_retries = 5
//! initial_delay_ms = 200
//! backoff_strategy = "EXPONENTIAL_WITH_FULL_JITTER"
//! retryable_status_codes = [429, 503]
//!
//! [connection.retry.error_specific_backoff]
//! CLIENT_THROTTLED = "DECORRELATED_JITTER"
//! ```
//!
//! Any [`ConfigSource`] can supply them: flat string maps (as from a
//! properties file), parsed TOML tables, or a [`LayeredSource`] stacking
//! several. Environment profiles are TOML files named after the environment
//! (`dev.toml`, `staging.toml`, ...) selected through `REBOUND_ENV`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::hash::BuildHasher;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::retry::{
    BackoffKind, ErrorCategory, PolicyError, RetryPolicy, DEFAULT_INITIAL_DELAY,
    DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, DEFAULT_RETRYABLE_CATEGORIES,
    DEFAULT_RETRYABLE_STATUS_CODES,
};

/// Prefix shared by every retry key.
pub const KEY_PREFIX: &str = "connection.retry.";

/// Environment variable naming the active environment.
pub const ENV_VAR: &str = "REBOUND_ENV";

/// Environment used when [`ENV_VAR`] is unset.
pub const DEFAULT_ENVIRONMENT: &str = "dev";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required key was absent.
    #[error("missing configuration key: {0}")]
    Missing(String),
    /// A key held a value that could not be parsed.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        /// Full dotted key.
        key: String,
        /// Raw value found.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The values parsed but do not form a valid policy.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// An environment file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// An environment file is not valid TOML.
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A read-only source of string configuration values.
pub trait ConfigSource {
    /// Value stored under the dotted `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Value stored under `key`, or [`ConfigError::Missing`].
    fn require(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }
}

impl<T: ConfigSource + ?Sized> ConfigSource for &T {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }
}

impl<S: BuildHasher> ConfigSource for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl ConfigSource for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }
}

impl ConfigSource for toml::Table {
    /// Looks the key up literally first, then walks nested tables one
    /// dotted segment at a time. Arrays render comma-separated.
    fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = toml::Table::get(self, key) {
            return render(value);
        }
        let mut segments = key.split('.');
        let mut value = toml::Table::get(self, segments.next()?)?;
        for segment in segments {
            value = value.as_table()?.get(segment)?;
        }
        render(value)
    }
}

fn render(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(items) => items
            .iter()
            .map(render)
            .collect::<Option<Vec<_>>>()
            .map(|items| items.join(",")),
        toml::Value::Table(_) => None,
    }
}

/// Several sources stacked; later layers override earlier ones.
#[derive(Default)]
pub struct LayeredSource {
    layers: Vec<Box<dyn ConfigSource + Send + Sync>>,
}

impl LayeredSource {
    /// An empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `layer` on top of the existing layers.
    pub fn with_layer(mut self, layer: impl ConfigSource + Send + Sync + 'static) -> Self {
        self.push(layer);
        self
    }

    /// Add `layer` on top of the existing layers.
    pub fn push(&mut self, layer: impl ConfigSource + Send + Sync + 'static) {
        self.layers.push(Box::new(layer));
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns true if there are no layers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl ConfigSource for LayeredSource {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().rev().find_map(|layer| layer.get(key))
    }
}

impl fmt::Debug for LayeredSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayeredSource")
            .field("layers", &self.layers.len())
            .finish()
    }
}

/// Retry settings as they appear in configuration.
///
/// Can be embedded in a larger serde config; missing fields take their
/// defaults. [`into_policy`](Self::into_policy) validates and converts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// First retry delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Default backoff algorithm.
    pub backoff_strategy: BackoffKind,
    /// HTTP statuses that are always retried.
    pub retryable_status_codes: Vec<u16>,
    /// Error categories that are retried.
    pub retryable_error_codes: Vec<ErrorCategory>,
    /// Per-category strategy overrides, keyed by category name.
    pub error_specific_backoff: BTreeMap<String, BackoffKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: millis(DEFAULT_INITIAL_DELAY.as_millis()),
            max_delay_ms: millis(DEFAULT_MAX_DELAY.as_millis()),
            backoff_strategy: BackoffKind::Exponential,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.to_vec(),
            retryable_error_codes: DEFAULT_RETRYABLE_CATEGORIES.to_vec(),
            error_specific_backoff: BTreeMap::new(),
        }
    }
}

impl From<&RetryPolicy> for RetryConfig {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            max_retries: policy.max_retries(),
            initial_delay_ms: millis(policy.initial_delay().as_millis()),
            max_delay_ms: millis(policy.max_delay().as_millis()),
            backoff_strategy: policy.strategy(),
            retryable_status_codes: policy.retryable_status_codes().iter().copied().collect(),
            retryable_error_codes: policy.retryable_error_categories().iter().copied().collect(),
            error_specific_backoff: policy
                .per_category_strategy()
                .iter()
                .map(|(category, kind)| (category.as_str().to_string(), *kind))
                .collect(),
        }
    }
}

impl RetryConfig {
    /// Read every `connection.retry.*` key from `source`. Absent keys keep
    /// their defaults.
    pub fn from_source<S: ConfigSource + ?Sized>(source: &S) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(n) = lookup(source, "max_retries")? {
            config.max_retries = n;
        }
        if let Some(ms) = lookup(source, "initial_delay_ms")? {
            config.initial_delay_ms = ms;
        }
        if let Some(ms) = lookup(source, "max_delay_ms")? {
            config.max_delay_ms = ms;
        }
        if let Some(kind) = lookup(source, "backoff_strategy")? {
            config.backoff_strategy = kind;
        }
        if let Some(codes) = lookup_list(source, "retryable_status_codes")? {
            config.retryable_status_codes = codes;
        }
        if let Some(categories) = lookup_list(source, "retryable_error_codes")? {
            config.retryable_error_codes = categories;
        }
        for category in ErrorCategory::ALL {
            let name = format!("error_specific_backoff.{}", category.as_str());
            if let Some(kind) = lookup(source, &name)? {
                config
                    .error_specific_backoff
                    .insert(category.as_str().to_string(), kind);
            }
        }

        Ok(config)
    }

    /// Parse a TOML document holding a `[connection.retry]` table.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(text)?;
        Self::from_source(&table)
    }

    /// Validate and build the policy.
    pub fn into_policy(self) -> Result<RetryPolicy, ConfigError> {
        let mut builder = RetryPolicy::builder()
            .max_retries(self.max_retries)
            .initial_delay_ms(self.initial_delay_ms)
            .max_delay_ms(self.max_delay_ms)
            .backoff_strategy(self.backoff_strategy)
            .retryable_status_codes(self.retryable_status_codes)
            .retryable_error_codes(self.retryable_error_codes);
        for (name, kind) in self.error_specific_backoff {
            builder = builder.error_specific_backoff(name.parse()?, kind);
        }
        Ok(builder.build()?)
    }
}

fn lookup<T, S>(source: &S, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    S: ConfigSource + ?Sized,
{
    let key = format!("{}{}", KEY_PREFIX, name);
    match source.get(&key) {
        None => Ok(None),
        Some(value) => parse(&key, value.trim()).map(Some),
    }
}

fn lookup_list<T, S>(source: &S, name: &str) -> Result<Option<Vec<T>>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    S: ConfigSource + ?Sized,
{
    let key = format!("{}{}", KEY_PREFIX, name);
    let Some(value) = source.get(&key) else {
        return Ok(None);
    };
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse(&key, item))
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn millis(ms: u128) -> u64 {
    u64::try_from(ms).unwrap_or(u64::MAX)
}

/// Name of the active environment: `REBOUND_ENV`, or `dev` when unset.
pub fn active_environment() -> String {
    std::env::var(ENV_VAR)
        .ok()
        .filter(|env| !env.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
}

/// Load `<dir>/<env>.toml` over the defaults. A missing file yields the
/// defaults unchanged.
pub fn load_environment(dir: impl AsRef<Path>, env: &str) -> Result<RetryConfig, ConfigError> {
    let path = dir.as_ref().join(format!("{}.toml", env));
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(environment = env, path = %path.display(), "no environment file, using defaults");
            return Ok(RetryConfig::default());
        }
        Err(source) => return Err(ConfigError::Io { path, source }),
    };
    debug!(environment = env, path = %path.display(), "loading environment file");
    RetryConfig::from_toml_str(&text)
}

/// Load the active environment's file from `dir`.
pub fn load_active(dir: impl AsRef<Path>) -> Result<RetryConfig, ConfigError> {
    load_environment(dir, &active_environment())
}
