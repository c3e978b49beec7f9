//! Registry of named circuit breakers.
//!
//! One breaker per name for the life of the registry. Breakers are created lazily the first
//! time a name is referenced and shared by every caller that uses that name afterwards.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use crate::circuit_breaker::{BreakerStats, CircuitBreaker, CircuitBreakerConfig};
use crate::clock::{Clock, MonotonicClock};

/// Errors from breaker registries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BreakerRegistryError {
    #[error("circuit breaker '{name}' not found")]
    NotFound { name: String },
}

pub trait BreakerRegistry: Send + Sync + std::fmt::Debug {
    /// Return the breaker registered under `name`, creating it from `config` on first use.
    /// `config` is ignored when the breaker already exists.
    fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> CircuitBreaker;
    fn get(&self, name: &str) -> Option<CircuitBreaker>;
    /// Register a breaker under its own name, replacing any existing one.
    fn register(&self, breaker: CircuitBreaker);
    /// Reset a breaker by name, erroring if missing.
    fn reset(&self, name: &str) -> Result<(), BreakerRegistryError>;
    /// Stats of every breaker, sorted by name.
    fn snapshot(&self) -> Vec<BreakerStats>;
}

/// In-memory registry. Clones share the same breakers.
#[derive(Clone, Debug)]
pub struct InMemoryBreakerRegistry {
    inner: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryBreakerRegistry {
    fn default() -> Self {
        Self::with_clock(MonotonicClock::default())
    }
}

impl InMemoryBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Breakers created by this registry read time from `clock`.
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self { inner: Arc::default(), clock: Arc::new(clock) }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BreakerRegistry for InMemoryBreakerRegistry {
    fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> CircuitBreaker {
        if let Some(existing) = self.get(name) {
            return existing;
        }
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(name.to_string())
            .or_insert_with(|| {
                info!(
                    target: "menuguard::circuit_breaker_registry",
                    breaker = %name,
                    failure_threshold = config.failure_threshold(),
                    recovery_timeout_secs = config.recovery_timeout().as_secs_f64(),
                    "circuit breaker created"
                );
                CircuitBreaker::with_clock(name, config, self.clock.clone())
            })
            .clone()
    }

    fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
    }

    fn register(&self, breaker: CircuitBreaker) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let name = breaker.name().to_string();
        if map.contains_key(&name) {
            warn!(
                target: "menuguard::circuit_breaker_registry",
                breaker = %name,
                "circuit breaker name replaced; last registration wins"
            );
        }
        map.insert(name, breaker);
    }

    fn reset(&self, name: &str) -> Result<(), BreakerRegistryError> {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                Ok(())
            }
            None => Err(BreakerRegistryError::NotFound { name: name.to_string() }),
        }
    }

    fn snapshot(&self) -> Vec<BreakerStats> {
        let breakers: Vec<CircuitBreaker> =
            self.inner.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect();
        let mut stats: Vec<BreakerStats> = breakers.iter().map(CircuitBreaker::stats).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}
