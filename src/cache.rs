//! In-process TTL cache with bounded size and pluggable eviction.
//!
//! Keys may be namespaced with a prefix (`"prefix:key"`); `clear(Some(prefix))` removes only
//! that namespace. Entries expire once their age exceeds their TTL. Expired entries are removed
//! lazily on read and proactively by a background sweeper started with [`TtlCache::start`].
//!
//! All mutation happens under one lock, so an eviction followed by an insert is atomic with
//! respect to other writers and `len() <= max_size` holds after every `set`.
//!
//! ```rust
//! use menuguard::{CacheConfig, EvictionStrategy, TtlCache};
//!
//! let cache = TtlCache::new(CacheConfig { max_size: 2, ..CacheConfig::default() }).unwrap();
//! cache.set("a", 1, None, None);
//! cache.set("b", 2, None, None);
//! cache.get("a", None); // touch a
//! cache.set("c", 3, None, None);
//! assert!(cache.get("b", None).is_none());
//! assert_eq!(cache.stats().strategy, EvictionStrategy::Lru);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// Oldest `last_accessed` goes first.
    #[default]
    Lru,
    /// Lowest `access_count` goes first.
    Lfu,
    /// First inserted goes first.
    Fifo,
    /// Any expired entry goes first, otherwise the oldest `created_at`.
    Ttl,
}

impl std::str::FromStr for EvictionStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            "fifo" => Ok(Self::Fifo),
            "ttl" => Ok(Self::Ttl),
            _ => Err(ConfigError::InvalidSetting {
                key: "cache.strategy".into(),
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
    #[serde(with = "crate::config::secs")]
    pub default_ttl: Duration,
    pub strategy: EvictionStrategy,
    /// Sweep period; zero disables the background sweeper.
    #[serde(with = "crate::config::secs")]
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(300),
            strategy: EvictionStrategy::Lru,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::InvalidCacheSize);
        }
        Ok(())
    }
}

/// A cached value and its bookkeeping. Times are clock milliseconds.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: u64,
    pub last_accessed: u64,
    pub access_count: u64,
    pub ttl: Option<Duration>,
    inserted_seq: u64,
    touched_seq: u64,
}

impl<V> CacheEntry<V> {
    /// Expired once strictly older than its TTL. Entries without a TTL never expire.
    pub fn is_expired(&self, now_millis: u64) -> bool {
        match self.ttl {
            Some(ttl) => {
                let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
                now_millis.saturating_sub(self.created_at) > ttl_millis
            }
            None => false,
        }
    }

    fn touch(&mut self, now_millis: u64, seq: u64) {
        self.last_accessed = now_millis;
        self.access_count += 1;
        self.touched_seq = seq;
    }
}

/// Counters and derived rates. Counters only grow for the life of the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub strategy: EvictionStrategy,
    pub default_ttl_secs: f64,
    pub cleanup_interval_secs: f64,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    /// Percentage of lookups that hit; 0 before any lookup.
    pub hit_rate: f64,
    pub uptime_secs: f64,
    pub hits_per_second: f64,
    pub sweeper_running: bool,
}

#[derive(Debug, Default)]
struct Metrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug)]
struct Entries<V> {
    map: HashMap<String, CacheEntry<V>>,
    seq: u64,
}

impl<V> Entries<V> {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn victim(&self, strategy: EvictionStrategy, now: u64) -> Option<String> {
        let entries = self.map.iter();
        let chosen = match strategy {
            EvictionStrategy::Lru => entries.min_by_key(|(_, e)| (e.last_accessed, e.touched_seq)),
            EvictionStrategy::Lfu => entries.min_by_key(|(_, e)| (e.access_count, e.inserted_seq)),
            EvictionStrategy::Fifo => entries.min_by_key(|(_, e)| e.inserted_seq),
            EvictionStrategy::Ttl => {
                let expired = self
                    .map
                    .iter()
                    .filter(|(_, e)| e.is_expired(now))
                    .min_by_key(|(_, e)| e.inserted_seq);
                expired.or_else(|| entries.min_by_key(|(_, e)| (e.created_at, e.inserted_seq)))
            }
        };
        chosen.map(|(k, _)| k.clone())
    }
}

#[derive(Debug)]
struct Sweeper {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Debug)]
struct Inner<V> {
    config: CacheConfig,
    entries: Mutex<Entries<V>>,
    metrics: Metrics,
    clock: Arc<dyn Clock>,
    started_at: u64,
    sweeper: Mutex<Option<Sweeper>>,
}

/// Shared TTL cache handle. Clones refer to the same cache.
#[derive(Debug)]
pub struct TtlCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

fn composite_key(key: &str, prefix: Option<&str>) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{p}:{key}"),
        _ => key.to_string(),
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new(config: CacheConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, MonotonicClock::default())
    }

    /// Read entry ages from `clock`.
    pub fn with_clock<C>(config: CacheConfig, clock: C) -> Result<Self, ConfigError>
    where
        C: Clock + 'static,
    {
        config.validate()?;
        let started_at = clock.now_millis();
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                entries: Mutex::new(Entries { map: HashMap::new(), seq: 0 }),
                metrics: Metrics::default(),
                clock: Arc::new(clock),
                started_at,
                sweeper: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    fn entries(&self) -> MutexGuard<'_, Entries<V>> {
        self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> u64 {
        self.inner.clock.now_millis()
    }

    /// Look up a live entry. Expired entries are removed and reported as misses.
    pub fn get(&self, key: &str, prefix: Option<&str>) -> Option<V> {
        let full_key = composite_key(key, prefix);
        let now = self.now();
        let metrics = &self.inner.metrics;
        let mut entries = self.entries();

        let expired = match entries.map.get(&full_key) {
            None => {
                metrics.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            entries.map.remove(&full_key);
            metrics.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %full_key, "cache entry expired on read");
            return None;
        }

        let seq = entries.next_seq();
        let entry = entries.map.get_mut(&full_key)?;
        entry.touch(now, seq);
        metrics.hits.fetch_add(1, Ordering::Relaxed);
        debug!(key = %full_key, "cache hit");
        Some(entry.value.clone())
    }

    /// Insert or replace a value. `ttl` defaults to the configured TTL.
    ///
    /// The size bound is checked before every write, overwrites included: while the cache is
    /// full, entries are evicted per the strategy. The evicted entry may be `key` itself.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>, prefix: Option<&str>) {
        let full_key = composite_key(key, prefix);
        let ttl = ttl.unwrap_or(self.inner.config.default_ttl);
        let now = self.now();
        let strategy = self.inner.config.strategy;
        let mut entries = self.entries();

        while entries.map.len() >= self.inner.config.max_size {
            let Some(victim) = entries.victim(strategy, now) else { break };
            entries.map.remove(&victim);
            self.inner.metrics.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %victim, ?strategy, "cache entry evicted");
        }
        // A surviving entry keeps its insertion position.
        let previous_seq = entries.map.get(&full_key).map(|e| e.inserted_seq);

        let seq = entries.next_seq();
        entries.map.insert(
            full_key.clone(),
            CacheEntry {
                value,
                created_at: now,
                last_accessed: now,
                access_count: 0,
                ttl: Some(ttl),
                inserted_seq: previous_seq.unwrap_or(seq),
                touched_seq: seq,
            },
        );
        self.inner.metrics.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %full_key, ttl_secs = ttl.as_secs_f64(), "cache set");
    }

    /// Returns whether an entry was removed.
    pub fn delete(&self, key: &str, prefix: Option<&str>) -> bool {
        let full_key = composite_key(key, prefix);
        let removed = self.entries().map.remove(&full_key).is_some();
        if removed {
            self.inner.metrics.deletes.fetch_add(1, Ordering::Relaxed);
            debug!(key = %full_key, "cache delete");
        }
        removed
    }

    /// Remove one namespace, or everything when `prefix` is `None`. Returns the count removed.
    pub fn clear(&self, prefix: Option<&str>) -> usize {
        let mut entries = self.entries();
        let before = entries.map.len();
        match prefix {
            Some(p) => {
                let namespace = format!("{p}:");
                entries.map.retain(|k, _| !k.starts_with(&namespace));
            }
            None => entries.map.clear(),
        }
        let removed = before - entries.map.len();
        debug!(prefix = prefix.unwrap_or("*"), removed, "cache cleared");
        removed
    }

    /// Composite keys currently stored, optionally limited to one namespace. Sorted.
    pub fn keys(&self, prefix: Option<&str>) -> Vec<String> {
        let namespace = prefix.map(|p| format!("{p}:"));
        let mut keys: Vec<String> = self
            .entries()
            .map
            .keys()
            .filter(|k| namespace.as_deref().map_or(true, |ns| k.starts_with(ns)))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry now. Removals count as evictions.
    pub fn purge_expired(&self) -> usize {
        let now = self.now();
        let mut entries = self.entries();
        let before = entries.map.len();
        entries.map.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.map.len();
        if removed > 0 {
            self.inner.metrics.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "expired cache entries swept");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let m = &self.inner.metrics;
        let hits = m.hits.load(Ordering::Relaxed);
        let misses = m.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 * 100.0 };
        let uptime_secs = self.now().saturating_sub(self.inner.started_at) as f64 / 1000.0;
        let hits_per_second = if uptime_secs > 0.0 { hits as f64 / uptime_secs } else { 0.0 };
        CacheStats {
            size: self.len(),
            max_size: self.inner.config.max_size,
            strategy: self.inner.config.strategy,
            default_ttl_secs: self.inner.config.default_ttl.as_secs_f64(),
            cleanup_interval_secs: self.inner.config.cleanup_interval.as_secs_f64(),
            hits,
            misses,
            sets: m.sets.load(Ordering::Relaxed),
            deletes: m.deletes.load(Ordering::Relaxed),
            evictions: m.evictions.load(Ordering::Relaxed),
            hit_rate,
            uptime_secs,
            hits_per_second,
            sweeper_running: self.is_running(),
        }
    }

    /// Whether the background sweeper is active.
    pub fn is_running(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    /// Spawn the background sweeper on the current tokio runtime.
    ///
    /// Returns `false` if it is already running, the interval is zero, or no runtime is
    /// available. The sweeper holds only a weak reference and exits once the cache is dropped.
    pub fn start(&self) -> bool {
        let interval = self.inner.config.cleanup_interval;
        if interval.is_zero() {
            return false;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("cache sweeper not started: no tokio runtime");
                return false;
            }
        };
        let mut slot = self.inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            return false;
        }

        let (shutdown, mut stopped) = oneshot::channel::<()>();
        let cache: Weak<Inner<V>> = Arc::downgrade(&self.inner);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        let Some(inner) = cache.upgrade() else { break };
                        TtlCache { inner }.purge_expired();
                    }
                }
            }
        });
        *slot = Some(Sweeper { shutdown, handle });
        info!(
            max_size = self.inner.config.max_size,
            cleanup_interval_secs = interval.as_secs_f64(),
            "cache sweeper started"
        );
        true
    }

    /// Stop the sweeper and wait for it to exit. No sweep runs after this returns.
    pub async fn stop(&self) {
        let sweeper = self.inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(Sweeper { shutdown, handle }) = sweeper else { return };
        let _ = shutdown.send(());
        match handle.await {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {}
            Err(err) => warn!(error = %err, "cache sweeper ended abnormally"),
        }
        info!("cache sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache(max_size: usize, strategy: EvictionStrategy, clock: &ManualClock) -> TtlCache<u32> {
        let config = CacheConfig { max_size, strategy, ..CacheConfig::default() };
        TtlCache::with_clock(config, clock.clone()).unwrap()
    }

    #[test]
    fn rejects_zero_capacity() {
        let config = CacheConfig { max_size: 0, ..CacheConfig::default() };
        assert_eq!(TtlCache::<u32>::new(config).unwrap_err(), ConfigError::InvalidCacheSize);
    }

    #[test]
    fn lru_evicts_least_recently_touched() {
        let clock = ManualClock::new();
        let c = cache(2, EvictionStrategy::Lru, &clock);
        c.set("a", 1, None, None);
        c.set("b", 2, None, None);
        assert_eq!(c.get("a", None), Some(1));
        c.set("c", 3, None, None);
        assert_eq!(c.keys(None), vec!["a", "c"]);
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn lfu_evicts_least_used() {
        let clock = ManualClock::new();
        let c = cache(3, EvictionStrategy::Lfu, &clock);
        c.set("a", 1, None, None);
        c.set("b", 2, None, None);
        c.set("c", 3, None, None);
        for _ in 0..3 {
            c.get("a", None);
            c.get("c", None);
        }
        c.get("b", None);
        c.set("d", 4, None, None);
        assert_eq!(c.keys(None), vec!["a", "c", "d"]);
        c.set("e", 5, None, None);
        assert_eq!(c.keys(None), vec!["a", "c", "e"], "untouched d is the least used");
    }

    #[test]
    fn fifo_ignores_access() {
        let clock = ManualClock::new();
        let c = cache(3, EvictionStrategy::Fifo, &clock);
        c.set("a", 1, None, None);
        c.set("b", 2, None, None);
        c.get("a", None);
        c.set("c", 3, None, None);
        c.set("d", 4, None, None);
        assert_eq!(c.keys(None), vec!["b", "c", "d"]);
    }

    #[test]
    fn overwrite_in_full_cache_still_evicts() {
        let clock = ManualClock::new();
        let c = cache(2, EvictionStrategy::Lru, &clock);
        c.set("a", 1, None, None);
        c.set("b", 2, None, None);
        c.set("a", 10, None, None);
        assert_eq!(c.stats().evictions, 1);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get("a", None), Some(10));

        let fifo = cache(2, EvictionStrategy::Fifo, &clock);
        fifo.set("a", 1, None, None);
        fifo.set("b", 2, None, None);
        fifo.get("a", None);
        fifo.set("a", 10, None, None);
        assert_eq!(fifo.stats().evictions, 1);
        fifo.set("c", 3, None, None);
        assert_eq!(fifo.keys(None), vec!["a", "c"], "the rewritten a is the newest entry");
    }

    #[test]
    fn overwrite_below_capacity_keeps_fifo_position() {
        let clock = ManualClock::new();
        let c = cache(3, EvictionStrategy::Fifo, &clock);
        c.set("a", 1, None, None);
        c.set("b", 2, None, None);
        c.set("a", 10, None, None);
        c.set("c", 3, None, None);
        c.set("d", 4, None, None);
        assert_eq!(c.stats().evictions, 1);
        assert_eq!(c.keys(None), vec!["b", "c", "d"]);
    }

    #[test]
    fn ttl_strategy_prefers_expired_then_oldest() {
        let clock = ManualClock::new();
        let c = cache(2, EvictionStrategy::Ttl, &clock);
        c.set("long", 1, Some(Duration::from_secs(100)), None);
        clock.advance(Duration::from_secs(1));
        c.set("short", 2, Some(Duration::from_secs(1)), None);
        clock.advance(Duration::from_secs(2));
        c.set("new", 3, None, None);
        assert_eq!(c.keys(None), vec!["long", "new"]);

        c.set("newest", 4, None, None);
        assert_eq!(c.keys(None), vec!["new", "newest"], "oldest created_at goes when none expired");
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let clock = ManualClock::new();
        let strategies = [
            EvictionStrategy::Lru,
            EvictionStrategy::Lfu,
            EvictionStrategy::Fifo,
            EvictionStrategy::Ttl,
        ];
        for strategy in strategies {
            let c = cache(5, strategy, &clock);
            for i in 0..50u32 {
                c.set(&format!("k{}", i % 17), i, None, Some("p"));
                if i % 3 == 0 {
                    c.get(&format!("k{}", i % 5), Some("p"));
                }
                assert!(c.len() <= 5, "{strategy:?} exceeded capacity");
            }
        }
    }

    #[test]
    fn entry_expires_strictly_after_ttl() {
        let clock = ManualClock::new();
        let c = cache(10, EvictionStrategy::Lru, &clock);
        c.set("k", 7, Some(Duration::from_secs(10)), None);
        clock.advance(Duration::from_millis(9_999));
        assert_eq!(c.get("k", None), Some(7));
        clock.advance(Duration::from_millis(2));
        assert_eq!(c.get("k", None), None);
        assert!(c.is_empty(), "expired entry is removed on read");
        let stats = c.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn default_ttl_applies_without_explicit_ttl() {
        let clock = ManualClock::new();
        let c = cache(10, EvictionStrategy::Lru, &clock);
        c.set("k", 1, None, None);
        clock.advance(Duration::from_secs(300));
        assert_eq!(c.get("k", None), Some(1));
        clock.advance(Duration::from_secs(1));
        assert_eq!(c.get("k", None), None);
    }

    #[test]
    fn prefixes_namespace_keys() {
        let clock = ManualClock::new();
        let c = cache(10, EvictionStrategy::Lru, &clock);
        c.set("x", 1, None, Some("suggestions"));
        c.set("y", 2, None, Some("suggestions"));
        c.set("x", 3, None, Some("health_rules"));
        c.set("suggestionsx", 4, None, None);

        assert_eq!(c.get("x", Some("suggestions")), Some(1));
        assert_eq!(c.get("suggestions:x", None), Some(1));
        assert_eq!(c.keys(Some("suggestions")), vec!["suggestions:x", "suggestions:y"]);

        assert_eq!(c.clear(Some("suggestions")), 2);
        assert_eq!(c.keys(None), vec!["health_rules:x", "suggestionsx"]);
        assert_eq!(c.clear(None), 2);
        assert!(c.is_empty());
    }

    #[test]
    fn stats_track_operations() {
        let clock = ManualClock::new();
        let c = cache(10, EvictionStrategy::Lru, &clock);
        c.set("a", 1, None, None);
        c.get("a", None);
        c.get("a", None);
        c.get("a", None);
        c.get("missing", None);
        assert!(c.delete("a", None));
        assert!(!c.delete("a", None));
        clock.advance(Duration::from_secs(2));

        let stats = c.stats();
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.hit_rate, 75.0);
        assert_eq!(stats.uptime_secs, 2.0);
        assert_eq!(stats.hits_per_second, 1.5);
        assert_eq!(stats.size, 0);
        assert!(!stats.sweeper_running);
    }

    #[test]
    fn purge_counts_evictions() {
        let clock = ManualClock::new();
        let c = cache(10, EvictionStrategy::Lru, &clock);
        c.set("a", 1, Some(Duration::from_secs(1)), None);
        c.set("b", 2, Some(Duration::from_secs(5)), None);
        clock.advance(Duration::from_secs(2));
        assert_eq!(c.purge_expired(), 1);
        assert_eq!(c.keys(None), vec!["b"]);
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn start_without_runtime_is_refused() {
        let c: TtlCache<u32> = TtlCache::new(CacheConfig::default()).unwrap();
        assert!(!c.start());
        assert!(!c.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_expired_entries_until_stopped() {
        let clock = ManualClock::new();
        let config = CacheConfig {
            cleanup_interval: Duration::from_secs(60),
            ..CacheConfig::default()
        };
        let c = TtlCache::with_clock(config, clock.clone()).unwrap();
        assert!(c.start());
        assert!(!c.start(), "second start is a no-op");
        assert!(c.is_running());

        c.set("a", 1u32, Some(Duration::from_secs(30)), None);
        clock.advance(Duration::from_secs(31));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(c.is_empty());
        assert_eq!(c.stats().evictions, 1);

        c.stop().await;
        assert!(!c.is_running());

        c.set("b", 2, Some(Duration::from_secs(1)), None);
        clock.advance(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(c.len(), 1, "no sweep after stop");
    }

    #[tokio::test]
    async fn concurrent_writers_respect_capacity() {
        let c: TtlCache<usize> =
            TtlCache::new(CacheConfig { max_size: 16, ..CacheConfig::default() }).unwrap();
        let tasks: Vec<_> = (0..8)
            .map(|t| {
                let c = c.clone();
                tokio::spawn(async move {
                    for i in 0..200 {
                        c.set(&format!("{t}-{i}"), i, None, None);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(c.len(), 16);
        assert_eq!(c.stats().evictions, 8 * 200 - 16);
    }
}
