//! Configuration for the retry and limit decorators

use std::fmt;
use std::num::NonZero;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};

/// Maximum number of calls a retried task gets by default
pub const DEFAULT_ATTEMPTS: u32 = 5;

/// Serializable retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of calls, including the first one
    pub attempts: u32,

    /// Delay before the first re-invocation (None re-invokes immediately)
    pub timeout: Option<Duration>,

    /// Multiplier applied to the delay for every further attempt
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            timeout: None,
            factor: 1.0,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of calls
    pub fn with_attempts(mut self, attempts: u32) -> ConfigResult<Self> {
        if attempts == 0 {
            return Err(ConfigError::InvalidAttempts { value: attempts });
        }
        self.attempts = attempts;
        Ok(self)
    }

    /// Set the base delay between attempts
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the backoff factor
    pub fn with_factor(mut self, factor: f64) -> ConfigResult<Self> {
        validate_factor(factor)?;
        self.factor = factor;
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.attempts == 0 {
            return Err(ConfigError::InvalidAttempts {
                value: self.attempts,
            });
        }
        validate_factor(self.factor)
    }
}

fn validate_factor(factor: f64) -> ConfigResult<()> {
    if !factor.is_finite() || factor <= 0.0 {
        return Err(ConfigError::InvalidFactor { factor });
    }
    Ok(())
}

/// Computes the delay before the next attempt from the attempt that just failed
pub type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// How long to wait before re-invoking a failed task
#[derive(Clone, Default)]
pub enum Backoff {
    /// Re-invoke right away
    #[default]
    None,
    /// `base * factor^(attempt - 1)`
    Exponential { base: Duration, factor: f64 },
    /// Caller supplied schedule
    Custom(DelayFn),
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::None => f.write_str("None"),
            Backoff::Exponential { base, factor } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("factor", factor)
                .finish(),
            Backoff::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Backoff {
    /// Delay after the given (1-based) failed attempt, or None to retry immediately
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            Backoff::None => None,
            Backoff::Exponential { base, factor } => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let secs = base.as_secs_f64() * factor.powi(exponent);
                Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
            }
            Backoff::Custom(delay) => Some(delay(attempt)),
        }
    }
}

/// Validated retry behaviour used by [`crate::retry`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            backoff: Backoff::None,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Backoff) -> ConfigResult<Self> {
        if attempts == 0 {
            return Err(ConfigError::InvalidAttempts { value: attempts });
        }
        if let Backoff::Exponential { factor, .. } = backoff {
            validate_factor(factor)?;
        }
        Ok(Self { attempts, backoff })
    }

    /// Default attempts, with delays taken from `delay(attempt)`
    pub fn with_delay_fn<F>(delay: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            backoff: Backoff::Custom(Arc::new(delay)),
        }
    }

    /// Override the attempt bound
    pub fn attempts(mut self, attempts: u32) -> ConfigResult<Self> {
        if attempts == 0 {
            return Err(ConfigError::InvalidAttempts { value: attempts });
        }
        self.attempts = attempts;
        Ok(self)
    }

    pub fn max_attempts(&self) -> u32 {
        self.attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Delay after the given (1-based) failed attempt
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        self.backoff.delay(attempt)
    }
}

/// A bare number is the attempt bound; zero is clamped to a single call.
impl From<u32> for RetryPolicy {
    fn from(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: Backoff::None,
        }
    }
}

impl TryFrom<RetryConfig> for RetryPolicy {
    type Error = ConfigError;

    fn try_from(config: RetryConfig) -> ConfigResult<Self> {
        config.validate()?;
        let backoff = match config.timeout {
            Some(base) => Backoff::Exponential {
                base,
                factor: config.factor,
            },
            None => Backoff::None,
        };
        Ok(Self {
            attempts: config.attempts,
            backoff,
        })
    }
}

/// Defines the type of concurrency limit to apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Limit {
    /// There is no limit.
    None,

    /// There is an upper limit.
    Max(NonZero<usize>),

    /// Use the host's available parallelism.
    #[default]
    Default,
}

impl From<usize> for Limit {
    fn from(value: usize) -> Self {
        NonZero::new(value).map(Limit::Max).unwrap_or(Limit::None)
    }
}

impl Limit {
    /// The effective bound, None when unbounded
    pub fn resolve(self) -> Option<usize> {
        match self {
            Limit::None => None,
            Limit::Max(max) => Some(max.get()),
            Limit::Default => Some(num_cpus::get().max(1)),
        }
    }
}

/// Maps a call's inputs to the partition whose budget it consumes
pub type PartitionFn = Arc<dyn Fn(&[Value]) -> String + Send + Sync>;

/// Settings for [`crate::limit`]
#[derive(Clone, Default)]
pub struct LimitConfig {
    /// Maximum concurrent executions per partition
    pub limit: Limit,

    /// Partition function; all calls share one budget when unset
    pub by: Option<PartitionFn>,
}

impl fmt::Debug for LimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimitConfig")
            .field("limit", &self.limit)
            .field("partitioned", &self.by.is_some())
            .finish()
    }
}

impl LimitConfig {
    pub fn new(limit: impl Into<Limit>) -> Self {
        Self {
            limit: limit.into(),
            by: None,
        }
    }

    /// Partition calls by a key computed from their inputs
    pub fn by<F>(mut self, partition: F) -> Self
    where
        F: Fn(&[Value]) -> String + Send + Sync + 'static,
    {
        self.by = Some(Arc::new(partition));
        self
    }
}

impl From<usize> for LimitConfig {
    fn from(limit: usize) -> Self {
        Self::new(limit)
    }
}

impl From<Limit> for LimitConfig {
    fn from(limit: Limit) -> Self {
        Self::new(limit)
    }
}
