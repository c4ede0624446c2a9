//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use rand::Rng;
use std::time::Duration;

/// Default maximum number of records per push batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

/// Largest fraction by which jitter stretches a retry delay.
pub const MAX_JITTER: f64 = 0.25;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of records per push batch.
    pub max_batch_size: usize,
    /// Upper bound for the concurrent local and remote fetch.
    pub fetch_timeout: Duration,
    /// Retry configuration for `sync_with_retry`.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            fetch_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the maximum push batch size.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Checks the configuration.
    ///
    /// Misconfigured values are reported, never clamped.
    pub fn validate(&self) -> SyncResult<()> {
        if self.max_batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "max_batch_size must be at least 1".into(),
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(SyncError::InvalidConfig(
                "fetch_timeout must be non-zero".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    ///
    /// With jitter enabled the backoff delay is stretched by up to
    /// [`MAX_JITTER`] of itself.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.backoff_delay(attempt);
        if !self.add_jitter || base.is_zero() {
            return base;
        }
        let stretch = rand::thread_rng().gen_range(0.0..=MAX_JITTER);
        base.mul_f64(1.0 + stretch)
    }

    /// Exponential delay before `attempt`, capped at `max_delay`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let Some(exponent) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SyncConfig::default();
        assert_eq!(config.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_batch_size_is_reported() {
        let config = SyncConfig::new().with_max_batch_size(0);
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn zero_timeout_and_attempts_are_reported() {
        let config = SyncConfig::new().with_fetch_timeout(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = SyncConfig::new().with_retry(RetryConfig::new(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        let delay = config.delay_for_attempt(5);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_millis(6250));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = RetryConfig::new(5).with_initial_delay(Duration::from_millis(100));
        let plain = config.clone().with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        for attempt in 1..=4 {
            let base = plain.delay_for_attempt(attempt);
            let samples: Vec<Duration> =
                (0..200).map(|_| config.delay_for_attempt(attempt)).collect();

            assert!(samples.iter().all(|&d| d >= base));
            assert!(samples.iter().all(|&d| d <= base.mul_f64(1.0 + MAX_JITTER)));
            assert!(samples.iter().any(|&d| d != samples[0]));
        }
    }
}
