//! Health scoring, rule filtering and ranking of candidate items.

use tracing::{debug, warn};

use crate::menu::{
    HealthGoal, HealthRule, Level, MedicalCondition, MenuItem, Profile, Recommendation,
};

/// Items kept when a rule matches nothing.
const RULE_FALLBACK_ITEMS: usize = 3;

/// Score in `[0, 10]`: higher is a better fit for the goal and condition.
pub fn health_score(item: &MenuItem, goal: HealthGoal, condition: MedicalCondition) -> f64 {
    let mut score = 7.0;

    match goal {
        HealthGoal::LoseWeight => {
            if item.calories < 100 {
                score += 2.0;
            } else if item.calories < 200 {
                score += 1.0;
            } else if item.calories > 300 {
                score -= 1.0;
            }
        }
        HealthGoal::GainWeight => {
            if item.calories > 250 {
                score += 1.5;
            } else if item.calories < 100 {
                score -= 0.5;
            }
        }
        HealthGoal::Maintain => {}
    }

    match item.spice_level {
        Level::Low => score += 0.5,
        Level::High => {
            score -= 0.3;
            if condition == MedicalCondition::Acidity {
                score -= 2.0;
            }
        }
        Level::Medium => {}
    }

    match item.oil_level {
        Level::Low => {
            score += 0.5;
            if condition == MedicalCondition::Bp {
                score += 1.0;
            }
        }
        Level::High => {
            score -= 0.3;
            if matches!(condition, MedicalCondition::Bp | MedicalCondition::Diabetes) {
                score -= 1.5;
            }
        }
        Level::Medium => {}
    }

    if condition == MedicalCondition::Diabetes && item.calories > 250 {
        score -= 1.0;
    }

    f64::clamp(score, 0.0, 10.0)
}

/// `"a"`, `"a and b"`, `"a, b and c"`.
fn join_natural(parts: &[&str]) -> String {
    match parts {
        [] => String::new(),
        [only] => (*only).to_string(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

pub fn recommendation_reason(item: &MenuItem, condition: MedicalCondition) -> String {
    let mut tags = Vec::new();
    if item.calories < 150 {
        tags.push("low calorie");
    }
    if item.spice_level == Level::Low {
        tags.push("mild spice");
    }
    if item.oil_level == Level::Low {
        tags.push("low oil");
    }
    match condition {
        MedicalCondition::Diabetes if item.calories < 200 => tags.push("suitable for diabetes"),
        MedicalCondition::Bp if item.oil_level == Level::Low => tags.push("heart-friendly"),
        MedicalCondition::Acidity if item.spice_level == Level::Low => {
            tags.push("easy on stomach")
        }
        _ => {}
    }
    if tags.is_empty() {
        tags.push("balanced nutrition");
    }
    format!("Excellent choice for you due to its {}.", join_natural(&tags))
}

pub fn health_benefits(item: &MenuItem, goal: HealthGoal) -> String {
    let mut benefits = Vec::new();
    if item.calories < 150 {
        benefits.push("helps maintain weight");
    }
    if item.spice_level == Level::Low {
        benefits.push("gentle on digestion");
    }
    if item.oil_level == Level::Low {
        benefits.push("heart-healthy");
    }
    match goal {
        HealthGoal::LoseWeight => benefits.push("supports weight loss"),
        HealthGoal::GainWeight if item.calories > 200 => benefits.push("provides energy"),
        _ => {}
    }
    if benefits.is_empty() {
        "nutritious and balanced".to_string()
    } else {
        benefits.join(", ")
    }
}

/// Keep the items a rule allows by name.
///
/// Without a rule, or with an empty allow-list, every item is kept. If the rule matches nothing,
/// up to three light items are kept instead, or the first three items when none is light.
pub fn filter_by_rule(items: Vec<MenuItem>, rule: Option<&HealthRule>) -> Vec<MenuItem> {
    let Some(rule) = rule.filter(|r| !r.allowed_items.is_empty()) else {
        return items;
    };

    let allowed: Vec<MenuItem> =
        items.iter().filter(|i| rule.allowed_items.contains(&i.item_name)).cloned().collect();
    if !allowed.is_empty() {
        debug!(rule = %rule.rule_id, matched = allowed.len(), "health rule applied");
        return allowed;
    }

    warn!(rule = %rule.rule_id, "no items match health rule, using lightest items");
    let light: Vec<MenuItem> =
        items.iter().filter(|i| i.is_light()).take(RULE_FALLBACK_ITEMS).cloned().collect();
    if light.is_empty() {
        items.into_iter().take(RULE_FALLBACK_ITEMS).collect()
    } else {
        light
    }
}

/// Score, sort (best first, ties keep input order) and describe the top `limit` items.
pub fn rank(
    items: &[MenuItem],
    profile: &Profile,
    limit: usize,
    message: Option<&str>,
) -> Vec<Recommendation> {
    let mut scored: Vec<(&MenuItem, f64)> = items
        .iter()
        .map(|item| (item, health_score(item, profile.health_goal, profile.medical_condition)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    scored
        .into_iter()
        .take(limit)
        .map(|(item, score)| Recommendation {
            item_id: item.item_id.clone(),
            item_name: item.item_name.clone(),
            calories: item.calories,
            spice_level: item.spice_level,
            oil_level: item.oil_level,
            diet_type: item.diet_type,
            image_url: item.image_url.clone(),
            recommendation_reason: recommendation_reason(item, profile.medical_condition),
            health_benefits: health_benefits(item, profile.health_goal),
            health_score: score,
            message: message.map(str::to_string),
        })
        .collect()
}
