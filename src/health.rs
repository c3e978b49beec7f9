//! Aggregate health reporting over the store, the breakers and the suggestion cache.
//!
//! A report lists one [`ComponentHealth`] per component. The overall status is the worst
//! component status. Summaries of recent reports are kept in a bounded history.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{CacheStats, TtlCache};
use crate::circuit_breaker::{BreakerStats, CircuitState};
use crate::circuit_breaker_registry::BreakerRegistry;
use crate::clock::{Clock, MonotonicClock};
use crate::menu::{BmiCategory, HealthRule, MedicalCondition};
use crate::store::{key, tables, KeyValueStore};

/// Breakers below this success rate (percent) are degraded.
const MIN_BREAKER_SUCCESS_RATE: f64 = 80.0;
/// Caches below this hit rate (percent) are degraded once they have seen enough hits.
const MIN_CACHE_HIT_RATE: f64 = 10.0;
const MIN_CACHE_HITS_FOR_RATE: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Deadline for the database probe.
    #[serde(with = "crate::config::secs")]
    pub check_timeout: Duration,
    /// Report summaries retained by [`HealthMonitor::history`].
    pub history_size: usize,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self { check_timeout: Duration::from_secs(5), history_size: 100 }
    }
}

/// Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    pub details: serde_json::Value,
}

impl ComponentHealth {
    fn new(component: impl Into<String>, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status,
            message: message.into(),
            response_time_ms: None,
            details: serde_json::Value::Null,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    fn timed(mut self, elapsed: Duration) -> Self {
        self.response_time_ms = Some(millis(elapsed));
        self
    }
}

/// Counts of component statuses within one report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
}

impl StatusCounts {
    fn tally(checks: &[ComponentHealth]) -> Self {
        checks.iter().fold(Self::default(), |mut counts, check| {
            match check.status {
                HealthStatus::Healthy => counts.healthy += 1,
                HealthStatus::Degraded => counts.degraded += 1,
                HealthStatus::Unhealthy => counts.unhealthy += 1,
            }
            counts
        })
    }

    pub fn total(&self) -> usize {
        self.healthy + self.degraded + self.unhealthy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub message: String,
    pub checks: Vec<ComponentHealth>,
    pub summary: StatusCounts,
    pub total_time_ms: u64,
    pub checked_at_ms: u64,
}

impl HealthReport {
    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.checks.iter().find(|c| c.component == name)
    }
}

/// What the history keeps of each report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub checked_at_ms: u64,
    pub status: HealthStatus,
    pub summary: StatusCounts,
    pub total_time_ms: u64,
}

/// Classify one breaker from its stats.
pub fn breaker_health(stats: &BreakerStats) -> ComponentHealth {
    let (status, message) = match stats.state {
        CircuitState::Open => (HealthStatus::Unhealthy, "circuit breaker is OPEN".to_string()),
        CircuitState::HalfOpen => {
            (HealthStatus::Degraded, "circuit breaker is HALF_OPEN (testing)".to_string())
        }
        CircuitState::Closed if stats.success_rate < MIN_BREAKER_SUCCESS_RATE => (
            HealthStatus::Degraded,
            format!("low success rate: {:.1}%", stats.success_rate),
        ),
        CircuitState::Closed => (HealthStatus::Healthy, "circuit breaker is CLOSED".to_string()),
    };
    ComponentHealth::new(format!("circuit_breaker_{}", stats.name), status, message).with_details(
        json!({
            "state": stats.state,
            "failure_count": stats.failure_count,
            "total_calls": stats.total_calls,
            "success_rate": stats.success_rate,
            "rejected_calls": stats.rejected_calls,
        }),
    )
}

/// Classify the cache from its stats.
pub fn cache_health(stats: &CacheStats) -> ComponentHealth {
    let sweeper_expected = stats.cleanup_interval_secs > 0.0;
    let (status, message) = if stats.size > stats.max_size {
        (
            HealthStatus::Unhealthy,
            format!("cache size {} exceeds maximum {}", stats.size, stats.max_size),
        )
    } else if stats.hit_rate < MIN_CACHE_HIT_RATE && stats.hits > MIN_CACHE_HITS_FOR_RATE {
        (HealthStatus::Degraded, format!("low hit rate: {:.1}%", stats.hit_rate))
    } else if sweeper_expected && !stats.sweeper_running {
        (HealthStatus::Degraded, "cleanup task is not running".to_string())
    } else {
        (HealthStatus::Healthy, "cache is operating normally".to_string())
    };
    let details = serde_json::to_value(stats).unwrap_or(serde_json::Value::Null);
    ComponentHealth::new("cache", status, message).with_details(details)
}

type StatsFn = Arc<dyn Fn() -> CacheStats + Send + Sync>;

/// Runs health checks and remembers their summaries.
pub struct HealthMonitor {
    store: Option<Arc<dyn KeyValueStore>>,
    registry: Arc<dyn BreakerRegistry>,
    cache: Option<StatsFn>,
    settings: HealthSettings,
    clock: Arc<dyn Clock>,
    history: Mutex<VecDeque<HistoryEntry>>,
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("store", &self.store)
            .field("registry", &self.registry)
            .field("cache", &self.cache.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

impl HealthMonitor {
    pub fn new(registry: Arc<dyn BreakerRegistry>, settings: HealthSettings) -> Self {
        Self {
            store: None,
            registry,
            cache: None,
            settings,
            clock: Arc::new(MonotonicClock::default()),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Probe `store` on every check.
    pub fn with_store<K: KeyValueStore + 'static>(mut self, store: K) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Include `cache` in every check.
    pub fn with_cache<V>(mut self, cache: TtlCache<V>) -> Self
    where
        V: Clone + Send + Sync + 'static,
    {
        self.cache = Some(Arc::new(move || cache.stats()));
        self
    }

    /// Timestamp history entries with `clock`.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Read a known health rule under the configured deadline.
    pub async fn check_database(&self) -> ComponentHealth {
        let Some(store) = &self.store else {
            return ComponentHealth::new(
                "database",
                HealthStatus::Unhealthy,
                "no store configured",
            );
        };
        let rule_id = HealthRule::id_for(BmiCategory::Normal, MedicalCondition::None);
        let probe = key(tables::HEALTH_RULES_KEY, rule_id.as_str());
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.settings.check_timeout,
            store.get(tables::HEALTH_RULES, &probe),
        )
        .await;
        let elapsed = started.elapsed();

        let check = match result {
            Ok(Ok(found)) => ComponentHealth::new(
                "database",
                HealthStatus::Healthy,
                "store is responding",
            )
            .with_details(json!({ "table": tables::HEALTH_RULES, "probe_found": found.is_some() })),
            Ok(Err(err)) => {
                warn!(error = %err, "database health check failed");
                ComponentHealth::new("database", HealthStatus::Unhealthy, err.to_string())
                    .with_details(json!({ "kind": err.kind.to_string() }))
            }
            Err(_) => {
                warn!(timeout = ?self.settings.check_timeout, "database health check timed out");
                ComponentHealth::new(
                    "database",
                    HealthStatus::Unhealthy,
                    format!("store did not respond within {:?}", self.settings.check_timeout),
                )
            }
        };
        check.timed(elapsed)
    }

    /// One entry per registered breaker, sorted by breaker name.
    pub fn check_breakers(&self) -> Vec<ComponentHealth> {
        self.registry.snapshot().iter().map(breaker_health).collect()
    }

    pub fn check_cache(&self) -> Option<ComponentHealth> {
        self.cache.as_ref().map(|stats| cache_health(&stats()))
    }

    /// Run every check, record the summary and return the full report.
    pub async fn check(&self) -> HealthReport {
        let started = Instant::now();
        let mut checks = vec![self.check_database().await];
        checks.extend(self.check_breakers());
        checks.extend(self.check_cache());

        let status = checks.iter().map(|c| c.status).max().unwrap_or(HealthStatus::Healthy);
        let summary = StatusCounts::tally(&checks);
        let message = match status {
            HealthStatus::Healthy => "all components are healthy".to_string(),
            HealthStatus::Degraded => {
                format!("{} of {} components degraded", summary.degraded, summary.total())
            }
            HealthStatus::Unhealthy => {
                format!("{} of {} components unhealthy", summary.unhealthy, summary.total())
            }
        };
        let report = HealthReport {
            status,
            message,
            checks,
            summary,
            total_time_ms: millis(started.elapsed()),
            checked_at_ms: self.clock.now_millis(),
        };
        debug!(status = %report.status, components = summary.total(), "health check complete");
        self.record(&report);
        report
    }

    fn record(&self, report: &HealthReport) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(HistoryEntry {
            checked_at_ms: report.checked_at_ms,
            status: report.status,
            summary: report.summary,
            total_time_ms: report.total_time_ms,
        });
        while history.len() > self.settings.history_size {
            history.pop_front();
        }
    }

    /// The most recent `limit` summaries, oldest first.
    pub fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// How many recorded reports ended in each status.
    pub fn report_counts(&self) -> StatusCounts {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.iter().fold(StatusCounts::default(), |mut counts, entry| {
            match entry.status {
                HealthStatus::Healthy => counts.healthy += 1,
                HealthStatus::Degraded => counts.degraded += 1,
                HealthStatus::Unhealthy => counts.unhealthy += 1,
            }
            counts
        })
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
