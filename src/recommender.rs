//! Suggestion orchestration with three degradation tiers.
//!
//! 1. **Primary**: cached response, or items and rule read from the store through
//!    [`ResilientCaller`], each query under its own deadline. Cached for `primary_ttl`.
//! 2. **Fallback**: any primary failure switches to the [`FallbackSource`]. The response is
//!    built the same way, flagged `fallback_mode` and cached for the shorter `fallback_ttl`.
//! 3. **Emergency**: if the fallback source fails too, a fixed single-item payload is returned
//!    and nothing is cached.
//!
//! [`Recommender::suggest`] never fails.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cache::TtlCache;
use crate::error::ServiceError;
use crate::fallback::FallbackSource;
use crate::menu::{
    BmiCategory, DietType, HealthRule, Level, MedicalCondition, MenuItem, Profile, Recommendation,
    Suggestion,
};
use crate::policy::{OperationClass, ResilientCaller};
use crate::scoring::{filter_by_rule, rank};
use crate::store::{key, tables, KeyValueStore, ScanFilter};

/// Cache namespace for suggestion responses.
pub const SUGGESTION_PREFIX: &str = "suggestions";

pub const ITEMS_OPERATION: &str = "get_menu_items_by_criteria";
pub const RULE_OPERATION: &str = "get_health_rule";

const FALLBACK_NOTE: &str = "Safe recommendation from fallback data";
const EMERGENCY_MESSAGE: &str =
    "Emergency mode: Showing safest option only. All services are unavailable.";
const SAFE_ITEM: &str = "Plain Idli";
const SAFE_REASON: &str = "Safe, low-calorie option suitable for your health profile.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionSettings {
    /// Lifetime of responses built from store data.
    #[serde(with = "crate::config::secs")]
    pub primary_ttl: Duration,
    /// Lifetime of responses built from fallback data.
    #[serde(with = "crate::config::secs")]
    pub fallback_ttl: Duration,
    #[serde(with = "crate::config::secs")]
    pub item_query_timeout: Duration,
    /// A rule query that overruns this is treated as "no rule".
    #[serde(with = "crate::config::secs")]
    pub rule_query_timeout: Duration,
    pub max_recommendations: usize,
    pub max_similar: usize,
}

impl Default for SuggestionSettings {
    fn default() -> Self {
        Self {
            primary_ttl: Duration::from_secs(20 * 60),
            fallback_ttl: Duration::from_secs(5 * 60),
            item_query_timeout: Duration::from_secs(3),
            rule_query_timeout: Duration::from_secs(2),
            max_recommendations: 5,
            max_similar: 3,
        }
    }
}

/// Where a suggestion came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Cache,
    Primary,
    Fallback,
    Emergency,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Cache => "cache",
            Tier::Primary => "primary",
            Tier::Fallback => "fallback",
            Tier::Emergency => "emergency",
        })
    }
}

/// Builds suggestions for health profiles.
#[derive(Debug, Clone)]
pub struct Recommender {
    store: Arc<dyn KeyValueStore>,
    caller: ResilientCaller,
    cache: TtlCache<Suggestion>,
    fallback: Arc<dyn FallbackSource>,
    settings: SuggestionSettings,
}

impl Recommender {
    pub fn new<K, F>(
        store: K,
        caller: ResilientCaller,
        cache: TtlCache<Suggestion>,
        fallback: F,
        settings: SuggestionSettings,
    ) -> Self
    where
        K: KeyValueStore + 'static,
        F: FallbackSource + 'static,
    {
        Self { store: Arc::new(store), caller, cache, fallback: Arc::new(fallback), settings }
    }

    pub fn cache(&self) -> &TtlCache<Suggestion> {
        &self.cache
    }

    pub fn caller(&self) -> &ResilientCaller {
        &self.caller
    }

    pub fn settings(&self) -> &SuggestionSettings {
        &self.settings
    }

    pub async fn suggest(&self, profile: &Profile) -> Suggestion {
        self.suggest_with_tier(profile).await.0
    }

    /// Like [`suggest`](Self::suggest), also reporting which tier answered.
    pub async fn suggest_with_tier(&self, profile: &Profile) -> (Suggestion, Tier) {
        let cache_key = profile.cache_key();
        if let Some(cached) = self.cache.get(&cache_key, Some(SUGGESTION_PREFIX)) {
            debug!(key = %cache_key, "suggestion served from cache");
            return (cached, Tier::Cache);
        }

        match self.primary(profile).await {
            Ok(suggestion) => {
                self.remember(&cache_key, &suggestion, self.settings.primary_ttl);
                return (suggestion, Tier::Primary);
            }
            Err(err) => {
                warn!(error = %err, profile = %cache_key, "primary tier failed, using fallback");
            }
        }

        match self.degraded(profile) {
            Ok(suggestion) => {
                self.remember(&cache_key, &suggestion, self.settings.fallback_ttl);
                (suggestion, Tier::Fallback)
            }
            Err(err) => {
                error!(error = %err, profile = %cache_key, "fallback tier failed, going emergency");
                (emergency(profile), Tier::Emergency)
            }
        }
    }

    fn remember(&self, cache_key: &str, suggestion: &Suggestion, ttl: Duration) {
        self.cache.set(cache_key, suggestion.clone(), Some(ttl), Some(SUGGESTION_PREFIX));
    }

    async fn primary(&self, profile: &Profile) -> Result<Suggestion, ServiceError> {
        let items = self.menu_items(profile).await?;
        let rule = self.health_rule(profile.bmi_category, profile.medical_condition).await?;
        info!(
            items = items.len(),
            rule = rule.as_ref().map(|r| r.rule_id.as_str()).unwrap_or("none"),
            "primary data loaded"
        );
        Ok(self.build(profile, items, rule.as_ref(), None))
    }

    fn degraded(&self, profile: &Profile) -> Result<Suggestion, ServiceError> {
        let items = self.fallback.items(
            profile.bmi_category,
            profile.medical_condition,
            profile.diet_type,
            profile.spice_tolerance,
        )?;
        let rule = self.fallback.rule(profile.bmi_category, profile.medical_condition)?;
        let mut suggestion = self.build(profile, items, rule.as_ref(), Some(FALLBACK_NOTE));
        suggestion.fallback_mode = true;
        Ok(suggestion)
    }

    /// Items suitable for `profile`, scanned from the store under the item query deadline.
    ///
    /// Rows that cannot be decoded are skipped.
    pub async fn menu_items(&self, profile: &Profile) -> Result<Vec<MenuItem>, ServiceError> {
        let filter = diet_filter(profile.diet_type);
        let deadline = self.settings.item_query_timeout;
        let rows = self
            .caller
            .call_within(OperationClass::Critical, ITEMS_OPERATION, deadline, || {
                let store = self.store.clone();
                let filter = filter.clone();
                async move { store.scan(tables::MENU_ITEMS, filter.as_ref()).await }
            })
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            match MenuItem::from_item(row, ITEMS_OPERATION, tables::MENU_ITEMS) {
                Ok(item) if item.suits(profile) => items.push(item),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "skipping undecodable menu item"),
            }
        }
        Ok(items)
    }

    /// The rule for a (category, condition) pair. A rule query that overruns its deadline
    /// yields `None`; any other failure is returned.
    pub async fn health_rule(
        &self,
        bmi: BmiCategory,
        condition: MedicalCondition,
    ) -> Result<Option<HealthRule>, ServiceError> {
        let rule_id = HealthRule::id_for(bmi, condition);
        let rule_key = key(tables::HEALTH_RULES_KEY, rule_id.as_str());
        let deadline = self.settings.rule_query_timeout;
        let lookup = self
            .caller
            .call_within(OperationClass::Read, RULE_OPERATION, deadline, || {
                let store = self.store.clone();
                let rule_key = rule_key.clone();
                async move {
                    match store.get(tables::HEALTH_RULES, &rule_key).await? {
                        Some(item) => {
                            HealthRule::from_item(&item, RULE_OPERATION, tables::HEALTH_RULES)
                                .map(Some)
                        }
                        None => Ok(None),
                    }
                }
            })
            .await;
        match lookup {
            Err(err) if err.is_timeout() => {
                warn!(rule = %rule_id, "health rule query timed out, continuing without a rule");
                Ok(None)
            }
            other => other,
        }
    }

    fn build(
        &self,
        profile: &Profile,
        items: Vec<MenuItem>,
        rule: Option<&HealthRule>,
        note: Option<&str>,
    ) -> Suggestion {
        let items = filter_by_rule(items, rule);
        let recommendations = rank(&items, profile, self.settings.max_recommendations, note);
        let Some(best) = recommendations.first() else {
            return safe_default(profile);
        };

        Suggestion {
            health_summary: format!(
                "Your BMI is {:.1} ({}). {} considerations applied.",
                profile.bmi, profile.bmi_category, profile.medical_condition
            ),
            bmi_category: profile.bmi_category,
            suggested_item: best.item_name.clone(),
            suggested_item_details: Some(best.details(profile)),
            similar_items: recommendations
                .iter()
                .skip(1)
                .take(self.settings.max_similar)
                .map(|r| r.details(profile))
                .collect(),
            reason: best.recommendation_reason.clone(),
            recommendations,
            fallback_mode: false,
            emergency_mode: false,
            message: None,
        }
    }
}

/// Vegetarian and vegan requests are narrowed by the store; everything else is filtered here.
fn diet_filter(diet: DietType) -> Option<ScanFilter> {
    match diet {
        DietType::Vegetarian | DietType::Vegan => Some(ScanFilter::eq("diet_type", diet.as_str())),
        DietType::NonVegetarian => None,
    }
}

fn safe_default(profile: &Profile) -> Suggestion {
    Suggestion {
        health_summary: format!(
            "Your BMI is {:.1} ({}). Using safe recommendation.",
            profile.bmi, profile.bmi_category
        ),
        bmi_category: profile.bmi_category,
        suggested_item: SAFE_ITEM.to_string(),
        suggested_item_details: None,
        similar_items: Vec::new(),
        reason: SAFE_REASON.to_string(),
        recommendations: Vec::new(),
        fallback_mode: false,
        emergency_mode: false,
        message: None,
    }
}

fn emergency(profile: &Profile) -> Suggestion {
    let item = Recommendation {
        item_id: "emergency_plain_idli".to_string(),
        item_name: "Plain Idli (Safe Option)".to_string(),
        calories: 58,
        spice_level: Level::Low,
        oil_level: Level::Low,
        diet_type: DietType::Vegetarian,
        image_url: None,
        recommendation_reason: "Safest option - low calories, low spice, low oil".to_string(),
        health_benefits: "Easy to digest, suitable for all conditions".to_string(),
        health_score: 9.0,
        message: Some(EMERGENCY_MESSAGE.to_string()),
    };
    Suggestion {
        health_summary: format!(
            "Your BMI is {:.1} ({}). Using safe recommendation.",
            profile.bmi, profile.bmi_category
        ),
        bmi_category: profile.bmi_category,
        suggested_item: item.item_name.clone(),
        suggested_item_details: Some(item.details(profile)),
        similar_items: Vec::new(),
        reason: item.recommendation_reason.clone(),
        recommendations: vec![item],
        fallback_mode: false,
        emergency_mode: true,
        message: Some(EMERGENCY_MESSAGE.to_string()),
    }
}
