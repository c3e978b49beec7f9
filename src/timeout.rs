//! Absolute deadline around an async operation.

use crate::error::{ConfigError, ResilienceError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    /// Rejects zero and `Duration::MAX`.
    pub fn new(duration: Duration) -> Result<Self, ConfigError> {
        if duration.is_zero() || duration == Duration::MAX {
            return Err(ConfigError::InvalidTimeout(duration));
        }
        Ok(Self { duration })
    }

    /// For durations already checked by a validated config.
    pub(crate) fn from_validated(duration: Duration) -> Self {
        debug_assert!(!duration.is_zero());
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run `operation` and fail with `ResilienceError::Timeout` if it outlives the deadline.
    /// The operation future is dropped at the deadline.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        let start = Instant::now();
        match tokio::time::timeout(self.duration, operation()).await {
            Ok(result) => result,
            Err(_) => {
                Err(ResilienceError::Timeout { elapsed: start.elapsed(), timeout: self.duration })
            }
        }
    }
}
