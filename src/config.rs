//! Process-wide settings: every tunable default in one place.
//!
//! Settings are plain serde data. Load them from JSON (missing keys keep their defaults), then
//! optionally overlay `MENUGUARD_*` environment variables:
//!
//! ```rust
//! use menuguard::Settings;
//!
//! let settings = Settings::from_json(r#"{ "cache": { "max_size": 50 } }"#)
//!     .unwrap()
//!     .overlay(|key| (key == "MENUGUARD_PRIMARY_TTL").then(|| "600".to_string()))
//!     .unwrap();
//! assert_eq!(settings.cache.max_size, 50);
//! assert_eq!(settings.suggestion.primary_ttl.as_secs(), 600);
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{CacheConfig, EvictionStrategy};
use crate::circuit_breaker::DEFAULT_HALF_OPEN_MAX_CALLS;
use crate::error::ConfigError;
use crate::health::HealthSettings;
use crate::policy::CallSites;
use crate::recommender::SuggestionSettings;

/// Serde adapter for durations written as (fractional) seconds.
pub mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Concurrent probes allowed while half-open, and successes needed to close.
    pub half_open_max_calls: usize,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self { half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheConfig,
    pub breaker: BreakerSettings,
    pub suggestion: SuggestionSettings,
    pub call_sites: CallSites,
    pub health: HealthSettings,
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: Settings =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with variables resolved through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::default().overlay(lookup)
    }

    /// Apply any `MENUGUARD_*` variables `lookup` resolves, then validate.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MENUGUARD_CACHE_MAX_SIZE") {
            self.cache.max_size = parse("MENUGUARD_CACHE_MAX_SIZE", &v)?;
        }
        if let Some(v) = lookup("MENUGUARD_CACHE_DEFAULT_TTL") {
            self.cache.default_ttl = parse_secs("MENUGUARD_CACHE_DEFAULT_TTL", &v)?;
        }
        if let Some(v) = lookup("MENUGUARD_CACHE_STRATEGY") {
            self.cache.strategy = v.trim().parse::<EvictionStrategy>().map_err(|_| {
                ConfigError::InvalidSetting { key: "MENUGUARD_CACHE_STRATEGY".into(), value: v }
            })?;
        }
        if let Some(v) = lookup("MENUGUARD_CACHE_CLEANUP_INTERVAL") {
            self.cache.cleanup_interval = parse_secs("MENUGUARD_CACHE_CLEANUP_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("MENUGUARD_PRIMARY_TTL") {
            self.suggestion.primary_ttl = parse_secs("MENUGUARD_PRIMARY_TTL", &v)?;
        }
        if let Some(v) = lookup("MENUGUARD_FALLBACK_TTL") {
            self.suggestion.fallback_ttl = parse_secs("MENUGUARD_FALLBACK_TTL", &v)?;
        }
        if let Some(v) = lookup("MENUGUARD_ITEM_QUERY_TIMEOUT") {
            self.suggestion.item_query_timeout = parse_secs("MENUGUARD_ITEM_QUERY_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("MENUGUARD_RULE_QUERY_TIMEOUT") {
            self.suggestion.rule_query_timeout = parse_secs("MENUGUARD_RULE_QUERY_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("MENUGUARD_HALF_OPEN_MAX_CALLS") {
            self.breaker.half_open_max_calls = parse("MENUGUARD_HALF_OPEN_MAX_CALLS", &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject zero sizes and zero durations where a positive value is required.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        if self.breaker.half_open_max_calls == 0 {
            return Err(ConfigError::InvalidHalfOpenLimit(0));
        }
        let s = &self.suggestion;
        for (key, d) in [
            ("suggestion.primary_ttl", s.primary_ttl),
            ("suggestion.fallback_ttl", s.fallback_ttl),
            ("suggestion.item_query_timeout", s.item_query_timeout),
            ("suggestion.rule_query_timeout", s.rule_query_timeout),
            ("health.check_timeout", self.health.check_timeout),
        ] {
            if d.is_zero() {
                return Err(ConfigError::InvalidSetting { key: key.into(), value: "0".into() });
            }
        }
        if s.max_recommendations == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "suggestion.max_recommendations".into(),
                value: "0".into(),
            });
        }
        if self.health.history_size == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "health.history_size".into(),
                value: "0".into(),
            });
        }
        self.call_sites.validate()
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidSetting {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = parse(key, value)?;
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidSetting {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.cache.max_size, 1000);
        assert_eq!(s.cache.default_ttl, Duration::from_secs(300));
        assert_eq!(s.cache.strategy, EvictionStrategy::Lru);
        assert_eq!(s.cache.cleanup_interval, Duration::from_secs(60));
        assert_eq!(s.breaker.half_open_max_calls, 3);
        assert_eq!(s.suggestion.primary_ttl, Duration::from_secs(1200));
        assert_eq!(s.suggestion.fallback_ttl, Duration::from_secs(300));
        assert_eq!(s.suggestion.item_query_timeout, Duration::from_secs(3));
        assert_eq!(s.suggestion.rule_query_timeout, Duration::from_secs(2));
        assert_eq!(s.suggestion.max_recommendations, 5);
        assert_eq!(s.health.history_size, 100);
        assert_eq!(s.call_sites.read.max_attempts, 3);
        assert_eq!(s.call_sites.critical.timeout, Duration::from_secs(5));
        s.validate().unwrap();
    }

    #[test]
    fn json_fills_missing_keys_with_defaults() {
        let s = Settings::from_json(
            r#"{
                "cache": { "strategy": "lfu", "default_ttl": 12.5 },
                "call_sites": { "write": { "max_attempts": 9 } }
            }"#,
        )
        .unwrap();
        assert_eq!(s.cache.strategy, EvictionStrategy::Lfu);
        assert_eq!(s.cache.default_ttl, Duration::from_millis(12_500));
        assert_eq!(s.cache.max_size, 1000);
        assert_eq!(s.call_sites.write.max_attempts, 9);
        assert_eq!(s.call_sites.write.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn json_errors_are_reported() {
        assert!(matches!(Settings::from_json("{ nope"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            Settings::from_json(r#"{ "cache": { "default_ttl": -1 } }"#),
            Err(ConfigError::Parse(_))
        ));
        assert_eq!(
            Settings::from_json(r#"{ "cache": { "max_size": 0 } }"#).unwrap_err(),
            ConfigError::InvalidCacheSize
        );
    }

    #[test]
    fn env_overlay_applies_known_variables() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("MENUGUARD_CACHE_MAX_SIZE", "64"),
            ("MENUGUARD_CACHE_STRATEGY", "FIFO"),
            ("MENUGUARD_RULE_QUERY_TIMEOUT", "0.25"),
            ("MENUGUARD_HALF_OPEN_MAX_CALLS", "1"),
        ]);
        let s = Settings::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(s.cache.max_size, 64);
        assert_eq!(s.cache.strategy, EvictionStrategy::Fifo);
        assert_eq!(s.suggestion.rule_query_timeout, Duration::from_millis(250));
        assert_eq!(s.breaker.half_open_max_calls, 1);
        assert_eq!(s.suggestion.primary_ttl, Duration::from_secs(1200));
    }

    #[test]
    fn unparsable_variables_are_rejected() {
        let err = Settings::from_lookup(|k| {
            (k == "MENUGUARD_PRIMARY_TTL").then(|| "twenty minutes".to_string())
        })
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidSetting {
                key: "MENUGUARD_PRIMARY_TTL".into(),
                value: "twenty minutes".into()
            }
        );

        let err = Settings::from_lookup(|k| {
            (k == "MENUGUARD_CACHE_STRATEGY").then(|| "random".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { .. }));
    }

    #[test]
    fn zero_timeouts_fail_validation() {
        let err = Settings::from_lookup(|k| {
            (k == "MENUGUARD_ITEM_QUERY_TIMEOUT").then(|| "0".to_string())
        })
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidSetting {
                key: "suggestion.item_query_timeout".into(),
                value: "0".into()
            }
        );
    }

    #[test]
    fn settings_serialize_durations_as_seconds() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(json["cache"]["default_ttl"], 300.0);
        assert_eq!(json["suggestion"]["rule_query_timeout"], 2.0);
        assert_eq!(json["call_sites"]["read"]["base_delay"], 0.5);
    }
}
