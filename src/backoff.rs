//! Backoff strategies for retry policies.
//!
//! Attempt semantics: `attempt` is the 0-based index of the attempt that just failed, so
//! `delay(0)` is the wait before the second try.
//!
//! | strategy      | delay(attempt)                     |
//! |---------------|------------------------------------|
//! | `Exponential` | `base * factor^attempt`            |
//! | `Linear`      | `base * (attempt + 1)`             |
//! | `Fixed`       | `base`                             |
//! | `Fibonacci`   | `base * fib(attempt + 1)`          |
//!
//! Every strategy is capped at `max`. Computations that overflow saturate to `MAX_BACKOFF`.
//!
//! ```rust
//! use std::time::Duration;
//! use menuguard::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_secs(1))
//!     .with_max(Duration::from_secs(10))
//!     .unwrap();
//! let delays: Vec<u64> = (0..6).map(|a| backoff.delay(a).as_secs()).collect();
//! assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Default multiplier for exponential backoff.
pub const DEFAULT_FACTOR: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Linear,
    Fixed,
    Fibonacci,
}

/// Pre-jitter delay schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    strategy: BackoffStrategy,
    base: Duration,
    max: Duration,
    factor: f64,
}

impl Backoff {
    pub fn new(strategy: BackoffStrategy, base: Duration) -> Self {
        Self { strategy, base, max: MAX_BACKOFF, factor: DEFAULT_FACTOR }
    }

    pub fn exponential(base: Duration) -> Self {
        Self::new(BackoffStrategy::Exponential, base)
    }

    pub fn linear(base: Duration) -> Self {
        Self::new(BackoffStrategy::Linear, base)
    }

    pub fn fixed(base: Duration) -> Self {
        Self::new(BackoffStrategy::Fixed, base)
    }

    pub fn fibonacci(base: Duration) -> Self {
        Self::new(BackoffStrategy::Fibonacci, base)
    }

    /// Cap every computed delay. `max` must be non-zero and at least `base`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, ConfigError> {
        if max.is_zero() || max < self.base {
            return Err(ConfigError::MaxLessThanBase { base: self.base, max });
        }
        self.max = max.min(MAX_BACKOFF);
        Ok(self)
    }

    /// Growth factor for the exponential strategy; ignored by the others.
    pub fn with_factor(mut self, factor: f64) -> Result<Self, ConfigError> {
        if !factor.is_finite() || factor < 1.0 {
            return Err(ConfigError::InvalidBackoffFactor(factor));
        }
        self.factor = factor;
        Ok(self)
    }

    pub fn strategy(&self) -> BackoffStrategy {
        self.strategy
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Delay to wait after the failed attempt with 0-based index `attempt`.
    pub fn delay(&self, attempt: usize) -> Duration {
        let raw = match self.strategy {
            BackoffStrategy::Fixed => self.base,
            BackoffStrategy::Linear => {
                let multiplier = u32::try_from(attempt.saturating_add(1)).unwrap_or(u32::MAX);
                self.base.checked_mul(multiplier).unwrap_or(MAX_BACKOFF)
            }
            BackoffStrategy::Exponential => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                scale(self.base, self.factor.powi(exponent))
            }
            BackoffStrategy::Fibonacci => scale(self.base, fibonacci(attempt.saturating_add(1))),
        };
        raw.min(self.max).min(MAX_BACKOFF)
    }
}

fn scale(base: Duration, multiplier: f64) -> Duration {
    let secs = base.as_secs_f64() * multiplier;
    if !secs.is_finite() || secs >= MAX_BACKOFF.as_secs_f64() {
        return MAX_BACKOFF;
    }
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(MAX_BACKOFF)
}

/// `fib(0) = 0`, `fib(1) = fib(2) = 1`. Saturates instead of overflowing.
fn fibonacci(n: usize) -> f64 {
    let (mut a, mut b) = (0.0_f64, 1.0_f64);
    if n == 0 {
        return a;
    }
    for _ in 1..n {
        let next = a + b;
        a = b;
        b = next;
        if !b.is_finite() {
            return f64::INFINITY;
        }
    }
    b
}
