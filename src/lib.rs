#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # menuguard
//!
//! Resilience and caching core for a health-aware food recommendation service.
//!
//! Every store call goes through a circuit breaker wrapped around a retry loop, tuned per
//! operation class. Suggestions are cached with per-tier TTLs and degrade from live store data
//! to static fallback data to a fixed emergency answer, so callers always get a response.
//!
//! ## Features
//!
//! - **TTL cache** with LRU, LFU, FIFO or TTL-first eviction and a background sweeper
//! - **Circuit breakers** shared by name through a registry, with bounded half-open probing
//! - **Retry policies** with exponential, linear, fixed or Fibonacci backoff and jitter
//! - **Operation classes** (`read`, `write`, `batch`, `critical`) picking breaker and retry
//!   parameters, also available as a tower `Layer`
//! - **Three-tier recommender**: primary, fallback, emergency
//! - **Health monitor** aggregating store, breaker and cache status
//!
//! ## Quick Start
//!
//! ```rust
//! use menuguard::menu::{BmiCategory, DietType, HealthGoal, MedicalCondition, Profile};
//! use menuguard::{
//!     CacheConfig, InMemoryBreakerRegistry, InMemoryStore, InstantSleeper, Recommender,
//!     ResilientCaller, Settings, StaticFallback, TtlCache,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let settings = Settings::default();
//!     let caller =
//!         ResilientCaller::with_sleeper(InMemoryBreakerRegistry::new(), &settings, InstantSleeper)
//!             .unwrap();
//!     let cache = TtlCache::new(CacheConfig::default()).unwrap();
//!     let recommender = Recommender::new(
//!         InMemoryStore::new(),
//!         caller,
//!         cache,
//!         StaticFallback::new(),
//!         settings.suggestion.clone(),
//!     );
//!
//!     let profile = Profile::new(
//!         23.1,
//!         BmiCategory::Normal,
//!         MedicalCondition::None,
//!         HealthGoal::Maintain,
//!         DietType::Vegetarian,
//!     );
//!     let suggestion = recommender.suggest(&profile).await;
//!     assert!(!suggestion.suggested_item.is_empty());
//! }
//! ```

pub mod backoff;
pub mod cache;
pub mod circuit_breaker;
pub mod circuit_breaker_registry;
pub mod clock;
pub mod config;
pub mod error;
pub mod fallback;
pub mod health;
pub mod jitter;
pub mod menu;
pub mod policy;
pub mod recommender;
pub mod retry;
pub mod scoring;
pub mod sleeper;
pub mod store;
pub mod timeout;

// Re-exports
pub use backoff::{Backoff, BackoffStrategy};
pub use cache::{CacheConfig, CacheEntry, CacheStats, EvictionStrategy, TtlCache};
pub use circuit_breaker::{BreakerStats, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use circuit_breaker_registry::{
    BreakerRegistry, BreakerRegistryError, InMemoryBreakerRegistry,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::Settings;
pub use error::{Classify, ConfigError, ErrorClass, ResilienceError, ServiceError};
pub use fallback::{FallbackSource, StaticFallback};
pub use health::{HealthMonitor, HealthReport, HealthSettings, HealthStatus};
pub use jitter::Jitter;
pub use policy::{CallSite, OperationClass, ResilienceLayer, ResilientCaller, StoreService};
pub use recommender::{Recommender, SuggestionSettings, Tier};
pub use retry::{RetryConfig, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use store::{InMemoryStore, KeyValueStore, StoreError, StoreErrorKind};
pub use timeout::TimeoutPolicy;
