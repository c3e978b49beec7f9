//! Named circuit breaker guarding calls to a shared dependency.
//!
//! States: `Closed` (normal), `Open` (fail fast), `HalfOpen` (limited probes).
//!
//! - Closed → Open once `failure_threshold` counted failures accumulate. A success while closed
//!   resets the count.
//! - Open → HalfOpen lazily, on the first call made at least `recovery_timeout` after the last
//!   counted failure. There is no timer.
//! - HalfOpen → Closed after `half_open_max_calls` consecutive successes; any counted failure
//!   sends it straight back to Open. At most `half_open_max_calls` probes run concurrently.
//!
//! Every call runs under the breaker's call timeout and a timeout counts as exactly one failure.
//! Whether an error counts is decided by [`ResilienceError::is_circuit_failure`]; fatal errors
//! pass through without touching the circuit.
//!
//! State transitions happen inside a short synchronous critical section, so concurrent
//! failures can never lose an increment. Cumulative counters are atomics.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::error::{Classify, ConfigError, ResilienceError};
use crate::timeout::TimeoutPolicy;

/// Default number of half-open successes needed to close.
pub const DEFAULT_HALF_OPEN_MAX_CALLS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        })
    }
}

/// Validated configuration for a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerConfig {
    failure_threshold: usize,
    #[serde(serialize_with = "crate::config::secs::serialize")]
    recovery_timeout: Duration,
    half_open_max_calls: usize,
    #[serde(serialize_with = "crate::config::secs::serialize")]
    call_timeout: Duration,
}

impl CircuitBreakerConfig {
    /// `half_open_max_calls` defaults to 3; `call_timeout` to 30s.
    pub fn new(failure_threshold: usize, recovery_timeout: Duration) -> Result<Self, ConfigError> {
        if failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold(failure_threshold));
        }
        if recovery_timeout.is_zero() {
            return Err(ConfigError::InvalidRecoveryTimeout(recovery_timeout));
        }
        Ok(Self {
            failure_threshold,
            recovery_timeout,
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
            call_timeout: Duration::from_secs(30),
        })
    }

    pub fn with_half_open_max_calls(mut self, limit: usize) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::InvalidHalfOpenLimit(limit));
        }
        self.half_open_max_calls = limit;
        Ok(self)
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        TimeoutPolicy::new(timeout)?;
        self.call_timeout = timeout;
        Ok(self)
    }

    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    pub fn half_open_max_calls(&self) -> usize {
        self.half_open_max_calls
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}

/// Point-in-time view of a breaker, as exposed to health checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: usize,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    /// Percentage of completed calls that succeeded; 100 before any call completes.
    pub success_rate: f64,
    /// Milliseconds since the last counted failure.
    pub last_failure_age_ms: Option<u64>,
    pub config: CircuitBreakerConfig,
}

#[derive(Debug)]
struct Core {
    state: CircuitState,
    failure_count: usize,
    last_failure_millis: Option<u64>,
    half_open_in_flight: usize,
    half_open_successes: usize,
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug)]
struct Shared {
    name: String,
    config: CircuitBreakerConfig,
    core: Mutex<Core>,
    counters: Counters,
    clock: Arc<dyn Clock>,
}

/// Circuit breaker handle. Clones share the same state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

enum Admission {
    Normal,
    Probe,
}

/// Releases a half-open probe slot if the call is dropped before it reports an outcome.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut core = self.breaker.lock();
            core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, MonotonicClock::default())
    }

    /// Use a specific clock for recovery windows.
    pub fn with_clock<C: Clock + 'static>(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config,
                core: Mutex::new(Core {
                    state: CircuitState::Closed,
                    failure_count: 0,
                    last_failure_millis: None,
                    half_open_in_flight: 0,
                    half_open_successes: 0,
                }),
                counters: Counters::default(),
                clock: Arc::new(clock),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.shared.config
    }

    /// Current state without triggering the lazy Open → HalfOpen check.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Whether two handles refer to the same breaker.
    pub fn same_as(&self, other: &CircuitBreaker) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Run `operation` under breaker protection and the configured call timeout.
    ///
    /// # Errors
    /// - `CircuitOpen` if the breaker is open (the operation is not invoked).
    /// - `Timeout` if the call outlives `call_timeout`.
    /// - Whatever the operation returned otherwise.
    pub async fn call<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        E: Classify,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        self.call_within(self.shared.config.call_timeout, operation).await
    }

    /// Like [`call`](Self::call), but with a deadline of `deadline` when that is shorter than
    /// the configured call timeout. A zero deadline is ignored.
    ///
    /// Overrunning the deadline is recorded as a failure like any other timeout.
    pub async fn call_within<T, E, Fut, Op>(
        &self,
        deadline: Duration,
        operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        E: Classify,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        let shared = &self.shared;
        shared.counters.total.fetch_add(1, Ordering::Relaxed);

        let admission = match self.admit() {
            Ok(admission) => admission,
            Err((failure_count, open_for)) => {
                shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(breaker = %shared.name, failure_count, "circuit open, failing fast");
                return Err(ResilienceError::CircuitOpen {
                    breaker: shared.name.clone(),
                    failure_count,
                    open_duration: open_for,
                });
            }
        };
        let mut slot = ProbeSlot { breaker: self, armed: matches!(admission, Admission::Probe) };

        let limit = match deadline {
            d if d.is_zero() => shared.config.call_timeout,
            d => d.min(shared.config.call_timeout),
        };
        let result = TimeoutPolicy::from_validated(limit).execute(operation).await;

        slot.armed = false;
        let probing = matches!(admission, Admission::Probe);
        match &result {
            Ok(_) => self.on_success(probing),
            Err(e) if e.is_circuit_failure() => self.on_failure(probing),
            Err(_) => self.on_neutral(probing),
        }
        result
    }

    /// Force the breaker back to Closed and clear its failure state.
    pub fn reset(&self) {
        let mut core = self.lock();
        core.state = CircuitState::Closed;
        core.failure_count = 0;
        core.last_failure_millis = None;
        core.half_open_in_flight = 0;
        core.half_open_successes = 0;
        info!(breaker = %self.shared.name, "circuit breaker manually reset");
    }

    pub fn stats(&self) -> BreakerStats {
        let (state, failure_count, last_failure) = {
            let core = self.lock();
            (core.state, core.failure_count, core.last_failure_millis)
        };
        let counters = &self.shared.counters;
        let successful = counters.successful.load(Ordering::Relaxed);
        let failed = counters.failed.load(Ordering::Relaxed);
        let completed = successful + failed;
        let success_rate =
            if completed == 0 { 100.0 } else { successful as f64 / completed as f64 * 100.0 };
        let now = self.shared.clock.now_millis();
        BreakerStats {
            name: self.shared.name.clone(),
            state,
            failure_count,
            total_calls: counters.total.load(Ordering::Relaxed),
            successful_calls: successful,
            failed_calls: failed,
            rejected_calls: counters.rejected.load(Ordering::Relaxed),
            success_rate,
            last_failure_age_ms: last_failure.map(|at| now.saturating_sub(at)),
            config: self.shared.config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.shared.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Result<Admission, (usize, Duration)> {
        let config = &self.shared.config;
        let now = self.shared.clock.now_millis();
        let mut core = self.lock();

        if core.state == CircuitState::Open {
            let since_failure = now.saturating_sub(core.last_failure_millis.unwrap_or(0));
            if since_failure < millis(config.recovery_timeout) {
                return Err((core.failure_count, Duration::from_millis(since_failure)));
            }
            core.state = CircuitState::HalfOpen;
            core.half_open_in_flight = 0;
            core.half_open_successes = 0;
            info!(breaker = %self.shared.name, "circuit breaker → half-open");
        }

        match core.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::HalfOpen => {
                if core.half_open_in_flight >= config.half_open_max_calls {
                    let since_failure = now.saturating_sub(core.last_failure_millis.unwrap_or(0));
                    return Err((core.failure_count, Duration::from_millis(since_failure)));
                }
                core.half_open_in_flight += 1;
                debug!(
                    breaker = %self.shared.name,
                    in_flight = core.half_open_in_flight,
                    max = config.half_open_max_calls,
                    "circuit breaker: half-open probe"
                );
                Ok(Admission::Probe)
            }
            CircuitState::Open => Err((core.failure_count, Duration::ZERO)),
        }
    }

    fn on_success(&self, probing: bool) {
        self.shared.counters.successful.fetch_add(1, Ordering::Relaxed);
        let mut core = self.lock();
        if probing {
            core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
        }
        match core.state {
            CircuitState::Closed => core.failure_count = 0,
            CircuitState::HalfOpen if probing => {
                core.half_open_successes += 1;
                if core.half_open_successes >= self.shared.config.half_open_max_calls {
                    core.state = CircuitState::Closed;
                    core.failure_count = 0;
                    core.half_open_in_flight = 0;
                    core.half_open_successes = 0;
                    info!(breaker = %self.shared.name, "circuit breaker → closed");
                }
            }
            _ => {}
        }
    }

    fn on_failure(&self, probing: bool) {
        self.shared.counters.failed.fetch_add(1, Ordering::Relaxed);
        let now = self.shared.clock.now_millis();
        let threshold = self.shared.config.failure_threshold;
        let mut core = self.lock();
        if probing {
            core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
        }
        core.failure_count += 1;
        core.last_failure_millis = Some(now);
        match core.state {
            CircuitState::HalfOpen => {
                core.state = CircuitState::Open;
                core.half_open_successes = 0;
                warn!(
                    breaker = %self.shared.name,
                    failures = core.failure_count,
                    "circuit breaker: probe failed → open"
                );
            }
            CircuitState::Closed if core.failure_count >= threshold => {
                core.state = CircuitState::Open;
                error!(
                    breaker = %self.shared.name,
                    failures = core.failure_count,
                    threshold,
                    "circuit breaker → open"
                );
            }
            _ => {}
        }
    }

    fn on_neutral(&self, probing: bool) {
        if probing {
            let mut core = self.lock();
            core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
