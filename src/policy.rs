//! Per-operation-class resilience: a circuit breaker wrapped around a retry loop.
//!
//! Every store call is classified as `read`, `write`, `batch` or `critical`. The class picks the
//! breaker thresholds and the retry parameters ([`CallSite`]). The breaker for a call is looked
//! up by name in a shared [`BreakerRegistry`] (`"{class}_{operation}"`), so all callers of the
//! same operation share one breaker.
//!
//! The breaker wraps the whole retry loop: exhausting retries is one circuit failure, and the
//! call timeout bounds the retries together with their backoff waits.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;
use tracing::warn;

use crate::backoff::BackoffStrategy;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::circuit_breaker_registry::BreakerRegistry;
use crate::config::Settings;
use crate::error::{ConfigError, ResilienceError, ServiceError};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::store::{Item, KeyValueStore, ScanFilter, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    Read,
    Write,
    Batch,
    Critical,
}

impl OperationClass {
    pub const ALL: [OperationClass; 4] = [
        OperationClass::Read,
        OperationClass::Write,
        OperationClass::Batch,
        OperationClass::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationClass::Read => "read",
            OperationClass::Write => "write",
            OperationClass::Batch => "batch",
            OperationClass::Critical => "critical",
        }
    }

    /// Failure threshold and recovery timeout for breakers of this class.
    pub fn breaker_thresholds(self) -> (usize, Duration) {
        match self {
            OperationClass::Read => (3, Duration::from_secs(30)),
            OperationClass::Write => (5, Duration::from_secs(60)),
            OperationClass::Batch => (2, Duration::from_secs(120)),
            OperationClass::Critical => (7, Duration::from_secs(15)),
        }
    }

    fn index(self) -> usize {
        match self {
            OperationClass::Read => 0,
            OperationClass::Write => 1,
            OperationClass::Batch => 2,
            OperationClass::Critical => 3,
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry and timeout parameters for one operation class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSite {
    pub max_attempts: usize,
    #[serde(serialize_with = "crate::config::secs::serialize")]
    pub base_delay: Duration,
    #[serde(serialize_with = "crate::config::secs::serialize")]
    pub max_delay: Duration,
    /// Deadline for the whole call, retries included.
    #[serde(serialize_with = "crate::config::secs::serialize")]
    pub timeout: Duration,
    pub strategy: BackoffStrategy,
    pub backoff_factor: f64,
}

impl CallSite {
    pub fn for_class(class: OperationClass) -> Self {
        let (max_attempts, base_ms, timeout_secs, strategy, backoff_factor) = match class {
            OperationClass::Read => (3, 500, 10, BackoffStrategy::Exponential, 2.0),
            OperationClass::Write => (5, 1_000, 15, BackoffStrategy::Exponential, 2.0),
            OperationClass::Batch => (2, 2_000, 45, BackoffStrategy::Linear, 2.0),
            OperationClass::Critical => (7, 100, 5, BackoffStrategy::Exponential, 1.5),
        };
        Self {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_secs(60),
            timeout: Duration::from_secs(timeout_secs),
            strategy,
            backoff_factor,
        }
    }

    /// The parameters actually used for `class`: writes and critical operations retry more,
    /// batches back off longer.
    ///
    /// | class    | attempts | base delay | max delay |
    /// |----------|----------|------------|-----------|
    /// | read     | n        | d          | m         |
    /// | write    | n + 2    | 1.5 × d    | m         |
    /// | batch    | n        | 2 × d      | m         |
    /// | critical | n + 4    | 0.5 × d    | 0.5 × m   |
    pub fn effective(&self, class: OperationClass) -> CallSite {
        let mut site = self.clone();
        match class {
            OperationClass::Read => {}
            OperationClass::Write => {
                site.max_attempts += 2;
                site.base_delay = self.base_delay.mul_f64(1.5);
            }
            OperationClass::Batch => {
                site.base_delay = self.base_delay * 2;
            }
            OperationClass::Critical => {
                site.max_attempts += 4;
                site.base_delay = self.base_delay / 2;
                site.max_delay = self.max_delay / 2;
            }
        }
        site
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            strategy: self.strategy,
            backoff_factor: self.backoff_factor,
            jitter: true,
        }
    }

    fn validate(&self, class: OperationClass) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(0));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidSetting {
                key: format!("call_sites.{class}.timeout"),
                value: "0".into(),
            });
        }
        self.retry_config().backoff().map(|_| ())
    }
}

/// Partially specified call site; unset fields keep the class default.
#[derive(Deserialize, Default)]
#[serde(default)]
struct CallSitePatch {
    max_attempts: Option<usize>,
    #[serde(deserialize_with = "optional_secs")]
    base_delay: Option<Duration>,
    #[serde(deserialize_with = "optional_secs")]
    max_delay: Option<Duration>,
    #[serde(deserialize_with = "optional_secs")]
    timeout: Option<Duration>,
    strategy: Option<BackoffStrategy>,
    backoff_factor: Option<f64>,
}

fn optional_secs<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    crate::config::secs::deserialize(d).map(Some)
}

impl CallSitePatch {
    fn apply(self, mut site: CallSite) -> CallSite {
        if let Some(v) = self.max_attempts {
            site.max_attempts = v;
        }
        if let Some(v) = self.base_delay {
            site.base_delay = v;
        }
        if let Some(v) = self.max_delay {
            site.max_delay = v;
        }
        if let Some(v) = self.timeout {
            site.timeout = v;
        }
        if let Some(v) = self.strategy {
            site.strategy = v;
        }
        if let Some(v) = self.backoff_factor {
            site.backoff_factor = v;
        }
        site
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSites {
    pub read: CallSite,
    pub write: CallSite,
    pub batch: CallSite,
    pub critical: CallSite,
}

impl Default for CallSites {
    fn default() -> Self {
        Self {
            read: CallSite::for_class(OperationClass::Read),
            write: CallSite::for_class(OperationClass::Write),
            batch: CallSite::for_class(OperationClass::Batch),
            critical: CallSite::for_class(OperationClass::Critical),
        }
    }
}

impl<'de> Deserialize<'de> for CallSites {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct Patches {
            read: CallSitePatch,
            write: CallSitePatch,
            batch: CallSitePatch,
            critical: CallSitePatch,
        }

        let patches = Patches::deserialize(deserializer)?;
        let defaults = CallSites::default();
        Ok(CallSites {
            read: patches.read.apply(defaults.read),
            write: patches.write.apply(defaults.write),
            batch: patches.batch.apply(defaults.batch),
            critical: patches.critical.apply(defaults.critical),
        })
    }
}

impl CallSites {
    pub fn get(&self, class: OperationClass) -> &CallSite {
        match class {
            OperationClass::Read => &self.read,
            OperationClass::Write => &self.write,
            OperationClass::Batch => &self.batch,
            OperationClass::Critical => &self.critical,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        OperationClass::ALL.iter().try_for_each(|&class| self.get(class).validate(class))
    }
}

#[derive(Clone, Debug)]
struct ClassPolicy {
    breaker: CircuitBreakerConfig,
    retry: RetryPolicy<StoreError>,
}

/// Runs store operations through the breaker and retry policy of their operation class.
///
/// Cheap to clone; clones share the registry and therefore the breakers.
#[derive(Clone, Debug)]
pub struct ResilientCaller {
    registry: Arc<dyn BreakerRegistry>,
    policies: Arc<[ClassPolicy; 4]>,
}

impl ResilientCaller {
    /// Build per-class policies from `settings`, sleeping with tokio between retries.
    pub fn new<R>(registry: R, settings: &Settings) -> Result<Self, ConfigError>
    where
        R: BreakerRegistry + 'static,
    {
        Self::with_sleeper(registry, settings, TokioSleeper)
    }

    pub fn with_sleeper<R, S>(
        registry: R,
        settings: &Settings,
        sleeper: S,
    ) -> Result<Self, ConfigError>
    where
        R: BreakerRegistry + 'static,
        S: Sleeper + 'static,
    {
        let sleeper: Arc<dyn Sleeper> = Arc::new(sleeper);
        let half_open = settings.breaker.half_open_max_calls;
        let build = |class: OperationClass| -> Result<ClassPolicy, ConfigError> {
            let site = settings.call_sites.get(class).effective(class);
            let (threshold, recovery) = class.breaker_thresholds();
            let breaker = CircuitBreakerConfig::new(threshold, recovery)?
                .with_half_open_max_calls(half_open)?
                .with_call_timeout(site.timeout)?;
            let config = site.retry_config();
            let retry = RetryPolicy::from_config(&config)?.with_sleeper(sleeper.clone()).build()?;
            Ok(ClassPolicy { breaker, retry })
        };
        let policies = [
            build(OperationClass::Read)?,
            build(OperationClass::Write)?,
            build(OperationClass::Batch)?,
            build(OperationClass::Critical)?,
        ];
        Ok(Self { registry: Arc::new(registry), policies: Arc::new(policies) })
    }

    pub fn registry(&self) -> &Arc<dyn BreakerRegistry> {
        &self.registry
    }

    pub fn breaker_name(class: OperationClass, operation: &str) -> String {
        format!("{class}_{operation}")
    }

    pub fn breaker_config(&self, class: OperationClass) -> CircuitBreakerConfig {
        self.policies[class.index()].breaker
    }

    pub fn retry_policy(&self, class: OperationClass) -> &RetryPolicy<StoreError> {
        &self.policies[class.index()].retry
    }

    /// Invoke `operation` (possibly several times) under the class's breaker, retry policy and
    /// call timeout, translating failures into [`ServiceError`].
    pub async fn call<T, Fut, Op>(
        &self,
        class: OperationClass,
        operation: &str,
        op: Op,
    ) -> Result<T, ServiceError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.call_within(class, operation, Duration::ZERO, op).await
    }

    /// Like [`call`](Self::call), with the call timeout lowered to `deadline` when that is
    /// shorter. The breaker records an overrun as one failure.
    pub async fn call_within<T, Fut, Op>(
        &self,
        class: OperationClass,
        operation: &str,
        deadline: Duration,
        mut op: Op,
    ) -> Result<T, ServiceError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let policy = &self.policies[class.index()];
        let name = Self::breaker_name(class, operation);
        let breaker = self.registry.get_or_create(&name, policy.breaker);
        let retry = &policy.retry;
        let op = &mut op;

        let result = breaker
            .call_within(deadline, || async move {
                retry
                    .execute(|| {
                        let attempt = op();
                        async move { attempt.await.map_err(ResilienceError::Inner) }
                    })
                    .await
            })
            .await;

        result.map_err(|err| {
            let err = ServiceError::from_resilience(operation, err);
            warn!(breaker = %name, operation, error = %err, "resilient call failed");
            err
        })
    }
}

/// Store operations as a request value, so a store can sit behind tower middleware.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreRequest {
    Get { table: String, key: Item },
    Put { table: String, item: Item },
    Update { table: String, key: Item, updates: Item },
    Delete { table: String, key: Item },
    Scan { table: String, filter: Option<ScanFilter> },
}

impl StoreRequest {
    /// Operation name used for breaker naming and diagnostics.
    pub fn operation(&self) -> &'static str {
        match self {
            StoreRequest::Get { .. } => "get_item",
            StoreRequest::Put { .. } => "put_item",
            StoreRequest::Update { .. } => "update_item",
            StoreRequest::Delete { .. } => "delete_item",
            StoreRequest::Scan { .. } => "scan",
        }
    }

    pub fn table(&self) -> &str {
        match self {
            StoreRequest::Get { table, .. }
            | StoreRequest::Put { table, .. }
            | StoreRequest::Update { table, .. }
            | StoreRequest::Delete { table, .. }
            | StoreRequest::Scan { table, .. } => table,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreResponse {
    Item(Option<Item>),
    Items(Vec<Item>),
    Updated(Item),
    Deleted(bool),
    Done,
}

/// Adapts any [`KeyValueStore`] into a `tower::Service<StoreRequest>`.
#[derive(Debug, Clone)]
pub struct StoreService<K> {
    store: Arc<K>,
}

impl<K> StoreService<K> {
    pub fn new(store: K) -> Self {
        Self { store: Arc::new(store) }
    }
}

impl<K> Service<StoreRequest> for StoreService<K>
where
    K: KeyValueStore + 'static,
{
    type Response = StoreResponse;
    type Error = StoreError;
    type Future = futures::future::BoxFuture<'static, Result<StoreResponse, StoreError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: StoreRequest) -> Self::Future {
        let store = self.store.clone();
        Box::pin(async move {
            match req {
                StoreRequest::Get { table, key } => {
                    store.get(&table, &key).await.map(StoreResponse::Item)
                }
                StoreRequest::Put { table, item } => {
                    store.put(&table, item).await.map(|()| StoreResponse::Done)
                }
                StoreRequest::Update { table, key, updates } => {
                    store.update(&table, &key, updates).await.map(StoreResponse::Updated)
                }
                StoreRequest::Delete { table, key } => {
                    store.delete(&table, &key).await.map(StoreResponse::Deleted)
                }
                StoreRequest::Scan { table, filter } => {
                    store.scan(&table, filter.as_ref()).await.map(StoreResponse::Items)
                }
            }
        })
    }
}

/// Wraps a `Service<StoreRequest>` so every request goes through a [`ResilientCaller`].
///
/// Breakers are named after the request's operation (`"read_get_item"`, ...).
#[derive(Clone, Debug)]
pub struct ResilienceLayer {
    caller: ResilientCaller,
    class: OperationClass,
}

impl ResilienceLayer {
    pub fn new(caller: ResilientCaller, class: OperationClass) -> Self {
        Self { caller, class }
    }
}

impl<S> Layer<S> for ResilienceLayer {
    type Service = Resilient<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Resilient { inner, caller: self.caller.clone(), class: self.class }
    }
}

#[derive(Clone, Debug)]
pub struct Resilient<S> {
    inner: S,
    caller: ResilientCaller,
    class: OperationClass,
}

impl<S> Service<StoreRequest> for Resilient<S>
where
    S: Service<StoreRequest, Error = StoreError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = ServiceError;
    type Future = futures::future::BoxFuture<'static, Result<S::Response, ServiceError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness is awaited per attempt through `oneshot`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: StoreRequest) -> Self::Future {
        let inner = self.inner.clone();
        let caller = self.caller.clone();
        let class = self.class;
        let operation = req.operation();
        // Each attempt owns its request; the closure owns the service.
        let attempt = move || inner.clone().oneshot(req.clone());
        Box::pin(async move { caller.call(class, operation, attempt).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::circuit_breaker_registry::InMemoryBreakerRegistry;
    use crate::clock::ManualClock;
    use crate::sleeper::{InstantSleeper, TrackingSleeper};
    use crate::store::{key, tables, InMemoryStore, StoreErrorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn caller(registry: &InMemoryBreakerRegistry) -> ResilientCaller {
        ResilientCaller::with_sleeper(registry.clone(), &Settings::default(), InstantSleeper)
            .unwrap()
    }

    fn throttled() -> StoreError {
        StoreError::new(StoreErrorKind::Throttling, "scan", tables::MENU_ITEMS, "slow down")
    }

    #[test]
    fn class_defaults() {
        let sites = CallSites::default();
        assert_eq!(sites.get(OperationClass::Read).max_attempts, 3);
        assert_eq!(sites.get(OperationClass::Write).base_delay, Duration::from_secs(1));
        assert_eq!(sites.get(OperationClass::Batch).strategy, BackoffStrategy::Linear);
        assert_eq!(sites.get(OperationClass::Critical).backoff_factor, 1.5);
        assert_eq!(OperationClass::Batch.breaker_thresholds(), (2, Duration::from_secs(120)));
        sites.validate().unwrap();
    }

    #[test]
    fn policies_follow_class_and_settings() {
        let registry = InMemoryBreakerRegistry::new();
        let mut settings = Settings::default();
        settings.breaker.half_open_max_calls = 1;
        let caller =
            ResilientCaller::with_sleeper(registry, &settings, InstantSleeper).unwrap();

        let write = caller.breaker_config(OperationClass::Write);
        assert_eq!(write.failure_threshold(), 5);
        assert_eq!(write.recovery_timeout(), Duration::from_secs(60));
        assert_eq!(write.half_open_max_calls(), 1);
        assert_eq!(write.call_timeout(), Duration::from_secs(15));
        assert_eq!(caller.retry_policy(OperationClass::Read).max_attempts(), 3);
        assert_eq!(caller.retry_policy(OperationClass::Write).max_attempts(), 7);
        assert_eq!(caller.retry_policy(OperationClass::Batch).max_attempts(), 2);
        assert_eq!(caller.retry_policy(OperationClass::Critical).max_attempts(), 11);
    }

    #[test]
    fn class_table_scales_configured_values() {
        let sites = CallSites::default();
        let write = sites.write.effective(OperationClass::Write);
        assert_eq!((write.max_attempts, write.base_delay), (7, Duration::from_millis(1_500)));
        assert_eq!(write.max_delay, Duration::from_secs(60));

        let batch = sites.batch.effective(OperationClass::Batch);
        assert_eq!((batch.max_attempts, batch.base_delay), (2, Duration::from_secs(4)));

        let critical = sites.critical.effective(OperationClass::Critical);
        assert_eq!(critical.max_attempts, 11);
        assert_eq!(critical.base_delay, Duration::from_millis(50));
        assert_eq!(critical.max_delay, Duration::from_secs(30));

        assert_eq!(sites.read.effective(OperationClass::Read), sites.read);
    }

    #[test]
    fn invalid_call_site_is_rejected() {
        let mut settings = Settings::default();
        settings.call_sites.batch.max_attempts = 0;
        let err = ResilientCaller::new(InMemoryBreakerRegistry::new(), &settings).unwrap_err();
        assert_eq!(err, ConfigError::InvalidMaxAttempts(0));
    }

    #[test]
    fn breaker_names_combine_class_and_operation() {
        assert_eq!(
            ResilientCaller::breaker_name(OperationClass::Read, "get_menu_items"),
            "read_get_menu_items"
        );
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let registry = InMemoryBreakerRegistry::new();
        let caller = caller(&registry);
        let calls = AtomicUsize::new(0);

        let value = caller
            .call(OperationClass::Read, "scan", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(throttled())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        let breaker = registry.get("read_scan").expect("breaker created on first use");
        assert_eq!(breaker.stats().successful_calls, 1);
        assert_eq!(breaker.stats().failure_count, 0);
    }

    #[tokio::test]
    async fn exhaustion_is_one_circuit_failure() {
        let registry = InMemoryBreakerRegistry::new();
        let caller = caller(&registry);
        let calls = AtomicUsize::new(0);

        let err = caller
            .call(OperationClass::Read, "scan", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(throttled()) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            ServiceError::RetryExhausted { operation, attempts, last } => {
                assert_eq!(operation, "scan");
                assert_eq!(attempts, 3);
                assert_eq!(last.kind, StoreErrorKind::Throttling);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(registry.get("read_scan").unwrap().stats().failure_count, 1);
    }

    #[tokio::test]
    async fn open_breaker_fails_fast_without_invoking() {
        let registry = InMemoryBreakerRegistry::with_clock(ManualClock::new());
        let caller = caller(&registry);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let _ = caller
                .call(OperationClass::Read, "scan", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(throttled()) }
                })
                .await;
        }
        assert_eq!(registry.get("read_scan").unwrap().state(), CircuitState::Open);
        let before = calls.load(Ordering::SeqCst);

        let err = caller
            .call(OperationClass::Read, "scan", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, StoreError>(()) }
            })
            .await
            .unwrap_err();

        assert!(err.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), before);
        assert!(err.to_string().contains("read_scan"));
    }

    #[tokio::test]
    async fn malformed_errors_are_neither_retried_nor_counted() {
        let registry = InMemoryBreakerRegistry::new();
        let caller = caller(&registry);
        let calls = AtomicUsize::new(0);

        let err = caller
            .call(OperationClass::Write, "put_item", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(StoreError::malformed("put_item", tables::MENU_ITEMS, "no key"))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ServiceError::Store(ref e) if e.kind == StoreErrorKind::Malformed));
        assert_eq!(registry.get("write_put_item").unwrap().stats().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn call_timeout_bounds_the_retry_loop() {
        let registry = InMemoryBreakerRegistry::new();
        let mut settings = Settings::default();
        settings.call_sites.read.timeout = Duration::from_secs(2);
        let caller = ResilientCaller::with_sleeper(registry.clone(), &settings, TokioSleeper)
            .unwrap();

        let err = caller
            .call(OperationClass::Read, "get_item", || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, StoreError>(())
            })
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(registry.get("read_get_item").unwrap().stats().failure_count, 1);
    }

    #[tokio::test]
    async fn backoff_waits_use_class_schedule() {
        let registry = InMemoryBreakerRegistry::new();
        let sleeper = TrackingSleeper::new();
        let mut settings = Settings::default();
        settings.call_sites.batch.max_attempts = 3;
        let caller =
            ResilientCaller::with_sleeper(registry, &settings, sleeper.clone()).unwrap();

        let _ = caller
            .call(OperationClass::Batch, "scan", || async { Err::<(), _>(throttled()) })
            .await;

        let within = |d: Duration, lo: u64, hi: u64| {
            d >= Duration::from_millis(lo) && d <= Duration::from_millis(hi)
        };
        let calls = sleeper.calls();
        assert_eq!(calls.len(), 2);
        // Linear from twice the configured 2s, with ±10% jitter.
        assert!(within(calls[0], 3_600, 4_400), "{calls:?}");
        assert!(within(calls[1], 7_200, 8_800), "{calls:?}");
    }

    /// A store service that can move between threads but not be shared by them.
    #[derive(Clone)]
    struct Unshared {
        inner: StoreService<InMemoryStore>,
        _not_sync: std::marker::PhantomData<std::cell::Cell<()>>,
    }

    impl Service<StoreRequest> for Unshared {
        type Response = StoreResponse;
        type Error = StoreError;
        type Future = <StoreService<InMemoryStore> as Service<StoreRequest>>::Future;

        fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            self.inner.poll_ready(cx)
        }

        fn call(&mut self, req: StoreRequest) -> Self::Future {
            self.inner.call(req)
        }
    }

    #[tokio::test]
    async fn layered_future_is_send_without_sync_service() {
        let registry = InMemoryBreakerRegistry::new();
        let unshared = Unshared {
            inner: StoreService::new(InMemoryStore::new()),
            _not_sync: std::marker::PhantomData,
        };
        let service = ResilienceLayer::new(caller(&registry), OperationClass::Read).layer(unshared);

        let scan = StoreRequest::Scan { table: tables::MENU_ITEMS.into(), filter: None };
        let response = tokio::spawn(service.oneshot(scan)).await.unwrap().unwrap();
        assert_eq!(response, StoreResponse::Items(Vec::new()));
        assert_eq!(registry.get("read_scan").unwrap().stats().successful_calls, 1);
    }

    #[tokio::test]
    async fn layer_wraps_store_service() {
        let store = InMemoryStore::new();
        let registry = InMemoryBreakerRegistry::new();
        let layer = ResilienceLayer::new(caller(&registry), OperationClass::Read);
        let service = layer.layer(StoreService::new(store.clone()));

        let mut item = key(tables::MENU_ITEMS_KEY, "m1");
        item.insert("item_name".into(), "Plain Idli".into());
        let put = StoreRequest::Put { table: tables::MENU_ITEMS.into(), item };
        assert_eq!(service.clone().oneshot(put).await.unwrap(), StoreResponse::Done);

        let get = StoreRequest::Get {
            table: tables::MENU_ITEMS.into(),
            key: key(tables::MENU_ITEMS_KEY, "m1"),
        };
        match service.clone().oneshot(get.clone()).await.unwrap() {
            StoreResponse::Item(Some(found)) => assert_eq!(found["item_name"], "Plain Idli"),
            other => panic!("unexpected response: {other:?}"),
        }

        store.set_outage(Some(StoreErrorKind::Timeout));
        let err = service.clone().oneshot(get).await.unwrap_err();
        assert!(err.is_retry_exhausted());
        let stats = registry.get("read_get_item").unwrap().stats();
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.successful_calls, 1);
    }
}
