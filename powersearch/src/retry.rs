//! Retry utilities with exponential backoff and optional jitter.
//!
//! The delay before retry `n` (0-indexed) is
//! `min(max_delay, base_delay * multiplier^n)`, optionally jittered.
//! Only failures classified as retryable are retried.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::errors::{ConfigError, PowerSearchError};

/// Jitter strategy applied on top of the computed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Use the computed delay as-is.
    #[default]
    None,
    /// Random from 0 to delay.
    Full,
    /// Half fixed, half random.
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor applied per retry.
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

const fn default_max_retries() -> usize {
    3
}

const fn default_base_delay_ms() -> u64 {
    1000
}

const fn default_max_delay_ms() -> u64 {
    60_000
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_multiplier(),
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a config that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default().with_max_retries(0)
    }

    /// Sets the number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Total attempts including the initial one.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Unjittered delay before retry `retry_index` (0-indexed).
    #[must_use]
    pub fn delay_for_retry(&self, retry_index: usize) -> Duration {
        let exponent = i32::try_from(retry_index).unwrap_or(i32::MAX);
        let delay_ms = (self.base_delay_ms as f64) * self.backoff_multiplier.powi(exponent);
        let capped = if delay_ms.is_finite() {
            delay_ms.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "retry.backoff_multiplier",
                "must be a finite number >= 1.0",
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::invalid(
                "retry.max_delay_ms",
                "must be >= retry.base_delay_ms",
            ));
        }
        Ok(())
    }
}

/// Backoff bookkeeping for one chain of attempts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RetryState {
    /// Attempts made so far.
    pub attempt: usize,
    /// Delay that will precede the next attempt.
    pub next_delay: Duration,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed attempt and computes the next delay.
    ///
    /// Returns `None` once retries are exhausted.
    pub fn record_failure(&mut self, config: &RetryConfig) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= config.max_attempts() {
            return None;
        }
        let base = config.delay_for_retry(self.attempt - 1);
        self.next_delay = apply_jitter(base, config.jitter);
        Some(self.next_delay)
    }

    /// Returns true if retries are exhausted.
    #[must_use]
    pub fn is_exhausted(&self, config: &RetryConfig) -> bool {
        self.attempt >= config.max_attempts()
    }
}

fn apply_jitter(delay: Duration, jitter: JitterStrategy) -> Duration {
    let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let jittered = match jitter {
        JitterStrategy::None => ms,
        JitterStrategy::Full => {
            if ms == 0 {
                0
            } else {
                rand::thread_rng().gen_range(0..=ms)
            }
        }
        JitterStrategy::Equal => {
            let half = ms / 2;
            if half == 0 {
                ms
            } else {
                half + rand::thread_rng().gen_range(0..=half)
            }
        }
    };
    Duration::from_millis(jittered)
}

/// Classification of errors for the retry loop.
pub trait Retryable {
    /// Whether the operation should be attempted again.
    fn is_retryable(&self) -> bool;
}

impl Retryable for PowerSearchError {
    fn is_retryable(&self) -> bool {
        Self::is_retryable(self)
    }
}

/// Terminal failure of a retried operation.
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// Attempts made, including the initial one.
    pub attempts: usize,
    /// Whether the loop stopped because retries ran out.
    pub exhausted: bool,
    /// The last error observed.
    pub error: E,
}

impl<E: fmt::Display> fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed after {} attempt(s): {}", self.attempts, self.error)
    }
}

impl From<RetryFailure<PowerSearchError>> for PowerSearchError {
    fn from(failure: RetryFailure<PowerSearchError>) -> Self {
        if failure.exhausted && failure.attempts > 1 {
            Self::RetriesExhausted {
                attempts: failure.attempts,
                source: Box::new(failure.error),
            }
        } else {
            failure.error
        }
    }
}

/// Executes an operation with retry logic.
///
/// Non-retryable errors are returned immediately without sleeping.
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    key: &str,
    mut operation: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let mut state = RetryState::new();

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => {
                return Err(RetryFailure {
                    attempts: state.attempt + 1,
                    exhausted: false,
                    error: e,
                });
            }
            Err(e) => match state.record_failure(config) {
                Some(delay) => {
                    tracing::debug!(
                        key = %key,
                        attempt = state.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after error"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::warn!(
                        key = %key,
                        attempts = state.attempt,
                        error = %e,
                        "Retries exhausted"
                    );
                    return Err(RetryFailure {
                        attempts: state.attempt,
                        exhausted: true,
                        error: e,
                    });
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test error (retryable={})", self.retryable)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_attempts(), 4);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 60_000);
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_delay_exponential() {
        let config = RetryConfig::new().with_base_delay_ms(100).with_multiplier(2.0);
        assert_eq!(config.delay_for_retry(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_retry(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_retry(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_multiplier_three() {
        let config = RetryConfig::new().with_base_delay_ms(10).with_multiplier(3.0);
        assert_eq!(config.delay_for_retry(2), Duration::from_millis(90));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000);
        assert_eq!(config.delay_for_retry(10), Duration::from_millis(5000));
        assert_eq!(config.delay_for_retry(10_000), Duration::from_millis(5000));
    }

    #[test]
    fn test_validate_rejects_shrinking_multiplier() {
        let config = RetryConfig::new().with_multiplier(0.5);
        assert!(config.validate().is_err());
        assert!(RetryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_state_records_failures_until_exhausted() {
        let config = RetryConfig::new().with_max_retries(2).with_base_delay_ms(10);
        let mut state = RetryState::new();

        assert_eq!(state.record_failure(&config), Some(Duration::from_millis(10)));
        assert_eq!(state.record_failure(&config), Some(Duration::from_millis(20)));
        assert_eq!(state.record_failure(&config), None);
        assert!(state.is_exhausted(&config));
    }

    #[test]
    fn test_full_jitter_bounded() {
        for _ in 0..20 {
            let d = apply_jitter(Duration::from_millis(100), JitterStrategy::Full);
            assert!(d <= Duration::from_millis(100));
        }
        let d = apply_jitter(Duration::from_millis(100), JitterStrategy::Equal);
        assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_with_retry_success_first_try() {
        let config = RetryConfig::new();
        let mut calls = 0;

        let result: Result<i32, RetryFailure<TestError>> = with_retry(&config, "test", || {
            calls += 1;
            async { Ok(42) }
        })
        .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_with_retry_success_after_failures() {
        let config = RetryConfig::new().with_max_retries(4).with_base_delay_ms(1);
        let calls = Arc::new(AtomicUsize::new(0));

        let result = with_retry(&config, "test", || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(TestError { retryable: true })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts() {
        let config = RetryConfig::new().with_max_retries(2).with_base_delay_ms(1);
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), _> = with_retry(&config, "test", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError { retryable: true })
            }
        })
        .await;

        let failure = result.unwrap_err();
        assert!(failure.exhausted);
        assert_eq!(failure.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_non_retryable_fails_fast() {
        let config = RetryConfig::new().with_max_retries(5).with_base_delay_ms(1);
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), _> = with_retry(&config, "test", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError { retryable: false })
            }
        })
        .await;

        let failure = result.unwrap_err();
        assert!(!failure.exhausted);
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_sleeps_between_attempts() {
        let config = RetryConfig::new().with_max_retries(2).with_base_delay_ms(1000);
        let start = tokio::time::Instant::now();

        let result: Result<(), _> = with_retry(&config, "test", || async {
            Err(TestError { retryable: true })
        })
        .await;

        assert!(result.is_err());
        // 1000ms + 2000ms of backoff, auto-advanced by the paused clock
        assert!(start.elapsed() >= Duration::from_millis(3000));
    }

    #[test]
    fn test_failure_into_pipeline_error() {
        let failure = RetryFailure {
            attempts: 4,
            exhausted: true,
            error: PowerSearchError::upstream_transient("503", Some(503)),
        };
        let err: PowerSearchError = failure.into();
        assert!(matches!(err, PowerSearchError::RetriesExhausted { attempts: 4, .. }));

        let failure = RetryFailure {
            attempts: 1,
            exhausted: false,
            error: PowerSearchError::InvalidRequest("bad".to_string()),
        };
        let err: PowerSearchError = failure.into();
        assert!(matches!(err, PowerSearchError::InvalidRequest(_)));
    }
}
