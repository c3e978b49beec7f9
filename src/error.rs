//! Error types for the resilience primitives and the service layer built on them.
//!
//! Two levels:
//! - [`ResilienceError<E>`] is what the primitives (retry, breaker, timeout) return. It is generic
//!   over the wrapped operation error so the primitives stay independent of the store.
//! - [`ServiceError`] is what the composed, store-facing callers hand back to the recommender.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::store::StoreError;

/// Cap the number of stored failures inside RetryExhausted to avoid unbounded growth.
pub const MAX_RETRY_FAILURES: usize = 10;

/// Whether a failure is worth another attempt and counts against circuit health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Transient dependency failure: retry, and count it as a circuit failure.
    Retryable,
    /// Caller or data bug: surface immediately, leave the circuit alone.
    Fatal,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Retryable)
    }
}

/// Closed classification of an operation error.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

/// Unified error type for all resilience policies
#[derive(Debug, Clone)]
pub enum ResilienceError<E> {
    /// The operation exceeded the timeout duration
    Timeout { elapsed: Duration, timeout: Duration },
    /// The named circuit breaker is open; the operation was not attempted
    CircuitOpen { breaker: String, failure_count: usize, open_duration: Duration },
    /// All retry attempts were exhausted
    RetryExhausted { attempts: usize, failures: Arc<Vec<E>> },
    /// The underlying operation failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, timeout } => {
                write!(f, "operation timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::CircuitOpen { breaker, failure_count, open_duration } => write!(
                f,
                "circuit breaker '{}' open ({} failures, open for {:?})",
                breaker, failure_count, open_duration
            ),
            Self::RetryExhausted { attempts, failures } => match failures.last() {
                Some(last) => {
                    write!(f, "retry exhausted after {} attempts; last error: {}", attempts, last)
                }
                None => write!(f, "retry exhausted after {} attempts", attempts),
            },
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RetryExhausted { failures, .. } => {
                failures.last().map(|e| e as &dyn std::error::Error)
            }
            _ => None,
        }
    }
}

impl<E> ResilienceError<E> {
    /// Construct a `RetryExhausted` variant keeping only the most recent `MAX_RETRY_FAILURES`.
    pub fn retry_exhausted(attempts: usize, failures: Vec<E>) -> Self {
        let trimmed = if failures.len() > MAX_RETRY_FAILURES {
            let skip = failures.len() - MAX_RETRY_FAILURES;
            failures.into_iter().skip(skip).collect()
        } else {
            failures
        };
        ResilienceError::RetryExhausted { attempts, failures: Arc::new(trimmed) }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Access all recorded failures for RetryExhausted, if present.
    pub fn failures(&self) -> Option<&[E]> {
        match self {
            Self::RetryExhausted { failures, .. } => Some(failures.as_slice()),
            _ => None,
        }
    }

    /// Access retry exhaustion info as (attempts, recorded_failures).
    pub fn retry_exhausted_info(&self) -> Option<(usize, usize)> {
        match self {
            Self::RetryExhausted { attempts, failures } => Some((*attempts, failures.len())),
            _ => None,
        }
    }

    /// Access timeout details as (elapsed, limit).
    pub fn timeout_details(&self) -> Option<(Duration, Duration)> {
        match self {
            Self::Timeout { elapsed, timeout } => Some((*elapsed, *timeout)),
            _ => None,
        }
    }

    /// Name of the breaker that rejected the call, if this is a circuit-open error.
    pub fn breaker_name(&self) -> Option<&str> {
        match self {
            Self::CircuitOpen { breaker, .. } => Some(breaker.as_str()),
            _ => None,
        }
    }
}

impl<E: Classify> ResilienceError<E> {
    /// Whether this outcome should count against the health of a circuit.
    ///
    /// Timeouts and exhausted retries always count. A rejection from a nested open breaker
    /// never does. Inner errors count only when they classify as retryable.
    pub fn is_circuit_failure(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RetryExhausted { .. } => true,
            Self::CircuitOpen { .. } => false,
            Self::Inner(e) => e.class().is_retryable(),
        }
    }
}

/// Invalid configuration rejected at construction time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("failure_threshold must be > 0 (got {0})")]
    InvalidFailureThreshold(usize),
    #[error("recovery_timeout must be > 0 (got {0:?})")]
    InvalidRecoveryTimeout(Duration),
    #[error("half_open_max_calls must be > 0 (got {0})")]
    InvalidHalfOpenLimit(usize),
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    #[error("timeout must be non-zero and finite (got {0:?})")]
    InvalidTimeout(Duration),
    #[error("max delay ({max:?}) must be >= base delay ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
    #[error("backoff factor must be finite and >= 1.0 (got {0})")]
    InvalidBackoffFactor(f64),
    #[error("jitter fraction must be within [0, 1] (got {0})")]
    InvalidJitter(f64),
    #[error("cache max_size must be > 0")]
    InvalidCacheSize,
    #[error("invalid value {value:?} for setting {key}")]
    InvalidSetting { key: String, value: String },
    #[error("settings could not be parsed: {0}")]
    Parse(String),
}

/// Failure surfaced by a resilience-wrapped store call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// The breaker rejected the call before any attempt was made.
    #[error("circuit breaker '{breaker}' is open; {operation} was not attempted")]
    CircuitOpen { breaker: String, operation: String },
    /// Every retry attempt failed.
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetryExhausted {
        operation: String,
        attempts: usize,
        #[source]
        last: StoreError,
    },
    /// The call as a whole exceeded its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },
    /// A single store failure that was not retried.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Raised explicitly to push a request down to the next degradation tier.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    /// Translate a primitive-level error for `operation` into the service taxonomy.
    pub fn from_resilience(operation: &str, err: ResilienceError<StoreError>) -> Self {
        match err {
            ResilienceError::CircuitOpen { breaker, .. } => {
                ServiceError::CircuitOpen { breaker, operation: operation.to_string() }
            }
            ResilienceError::RetryExhausted { attempts, failures } => match failures.last() {
                Some(last) => ServiceError::RetryExhausted {
                    operation: operation.to_string(),
                    attempts,
                    last: last.clone(),
                },
                None => ServiceError::Unavailable(format!(
                    "{operation} exhausted {attempts} attempts without a recorded failure"
                )),
            },
            ResilienceError::Timeout { timeout, .. } => {
                ServiceError::Timeout { operation: operation.to_string(), timeout }
            }
            ResilienceError::Inner(e) => ServiceError::Store(e),
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ServiceError::CircuitOpen { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, ServiceError::RetryExhausted { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ServiceError::Timeout { .. })
    }
}
