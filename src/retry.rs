//! Retry policy for fallible async operations.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries).
//! - Only `ResilienceError::Inner(E)` values are eligible for retry; other variants (timeouts,
//!   open circuits) return immediately.
//! - The classifier decides per error: `Retryable` errors are retried, `Fatal` errors are
//!   returned as-is after a single attempt. By default it is `E`'s own [`Classify`] impl.
//! - After the last attempt fails, the caller gets `ResilienceError::RetryExhausted` carrying the
//!   attempt count and the most recent failures, never the bare last error.
//! - Waits go through a [`Sleeper`]; production uses `TokioSleeper`.
//!
//! ```rust
//! use std::time::Duration;
//! use menuguard::{InstantSleeper, ResilienceError, RetryPolicy, StoreError, StoreErrorKind};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let policy = RetryPolicy::<StoreError>::builder()
//!     .max_attempts(3)
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//! let result: Result<(), _> = policy
//!     .execute(|| async {
//!         Err(ResilienceError::Inner(StoreError::new(
//!             StoreErrorKind::Throttling, "scan", "menu_items", "slow down",
//!         )))
//!     })
//!     .await;
//! assert_eq!(result.unwrap_err().retry_exhausted_info(), Some((3, 3)));
//! # });
//! ```

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::backoff::{Backoff, BackoffStrategy};
use crate::error::{Classify, ConfigError, ErrorClass, ResilienceError, MAX_RETRY_FAILURES};
use crate::jitter::Jitter;
use crate::sleeper::{Sleeper, TokioSleeper};

/// Declarative retry parameters, one set per call site or operation class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: usize,
    #[serde(with = "crate::config::secs")]
    pub base_delay: Duration,
    #[serde(with = "crate::config::secs")]
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Validated backoff schedule described by this config.
    pub fn backoff(&self) -> Result<Backoff, ConfigError> {
        Backoff::new(self.strategy, self.base_delay)
            .with_max(self.max_delay)?
            .with_factor(self.backoff_factor)
    }
}

type Classifier<E> = Arc<dyn Fn(&E) -> ErrorClass + Send + Sync>;

/// Retry policy combining backoff, jitter, classification, and sleeper.
pub struct RetryPolicy<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    classifier: Classifier<E>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
            jitter: self.jitter,
            classifier: self.classifier.clone(),
            sleeper: self.sleeper.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &self.sleeper)
            .field("classifier", &"<classifier>")
            .finish()
    }
}

impl<E> RetryPolicy<E>
where
    E: std::error::Error + Classify + Send + Sync + 'static,
{
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    /// Builder pre-filled from a [`RetryConfig`].
    pub fn from_config(config: &RetryConfig) -> Result<RetryPolicyBuilder<E>, ConfigError> {
        Ok(RetryPolicyBuilder::new()
            .max_attempts(config.max_attempts)
            .backoff(config.backoff()?)
            .with_jitter(Jitter::enabled(config.jitter)))
    }
}

impl<E> RetryPolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Wait applied after the failed attempt with 0-based index `attempt`, jitter included.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.jitter.apply(self.backoff.delay(attempt))
    }

    /// Execute an async operation with retry semantics.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnMut() -> Fut,
    {
        let mut failures: VecDeque<E> = VecDeque::new();
        let mut attempt = 0usize;

        loop {
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            attempt = attempt + 1,
                            max_attempts = self.max_attempts,
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(ResilienceError::Inner(e)) => e,
                Err(other) => return Err(other),
            };

            if !(self.classifier)(&err).is_retryable() {
                debug!(error = %err, "non-retryable error, not retrying");
                return Err(ResilienceError::Inner(err));
            }

            attempt += 1;
            if attempt >= self.max_attempts {
                error!(attempts = attempt, last_error = %err, "all retry attempts exhausted");
                failures.push_back(err);
                while failures.len() > MAX_RETRY_FAILURES {
                    failures.pop_front();
                }
                return Err(ResilienceError::retry_exhausted(attempt, failures.into()));
            }

            let delay = self.delay_for(attempt - 1);
            warn!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "attempt failed, retrying"
            );
            failures.push_back(err);
            while failures.len() > MAX_RETRY_FAILURES {
                failures.pop_front();
            }
            self.sleeper.sleep(delay).await;
        }
    }
}

/// Builder for `RetryPolicy`.
pub struct RetryPolicyBuilder<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    classifier: Classifier<E>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> RetryPolicyBuilder<E>
where
    E: std::error::Error + Classify + Send + Sync + 'static,
{
    /// Three attempts, exponential backoff from one second, ±10% jitter.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(Duration::from_secs(1)),
            jitter: Jitter::standard(),
            classifier: Arc::new(|e: &E| e.class()),
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: std::error::Error + Classify + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Set total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Override how errors are classified.
    pub fn classify_with<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&E) -> ErrorClass + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Result<RetryPolicy<E>, ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(0));
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            classifier: self.classifier,
            sleeper: self.sleeper,
        })
    }
}
