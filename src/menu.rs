//! Menu domain model: items, health rules, user profiles and the suggestion payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::store::{Item, StoreError};

/// Spice and oil intensity. Ordered from mildest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Low => "low",
            Level::Medium => "medium",
            Level::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BmiCategory {
    Underweight,
    Normal,
    Overweight,
    Obese,
}

impl BmiCategory {
    /// Thresholds 18.5, 25 and 30; each lower bound is inclusive.
    pub fn from_bmi(bmi: f64) -> Self {
        if bmi < 18.5 {
            BmiCategory::Underweight
        } else if bmi < 25.0 {
            BmiCategory::Normal
        } else if bmi < 30.0 {
            BmiCategory::Overweight
        } else {
            BmiCategory::Obese
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BmiCategory::Underweight => "underweight",
            BmiCategory::Normal => "normal",
            BmiCategory::Overweight => "overweight",
            BmiCategory::Obese => "obese",
        }
    }
}

/// BMI rounded to two decimals, with its category. `None` for non-positive or non-finite input.
pub fn calculate_bmi(height_cm: f64, weight_kg: f64) -> Option<(f64, BmiCategory)> {
    if !(height_cm.is_finite() && weight_kg.is_finite()) || height_cm <= 0.0 || weight_kg <= 0.0 {
        return None;
    }
    let height_m = height_cm / 100.0;
    let bmi = weight_kg / (height_m * height_m);
    let rounded = (bmi * 100.0).round() / 100.0;
    Some((rounded, BmiCategory::from_bmi(bmi)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MedicalCondition {
    None,
    Diabetes,
    Bp,
    Acidity,
}

impl MedicalCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            MedicalCondition::None => "none",
            MedicalCondition::Diabetes => "diabetes",
            MedicalCondition::Bp => "bp",
            MedicalCondition::Acidity => "acidity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DietType {
    #[serde(rename = "vegetarian", alias = "veg")]
    Vegetarian,
    #[serde(rename = "vegan")]
    Vegan,
    #[serde(
        rename = "non_vegetarian",
        alias = "non-vegetarian",
        alias = "non-veg",
        alias = "nonveg"
    )]
    NonVegetarian,
}

impl DietType {
    pub fn as_str(self) -> &'static str {
        match self {
            DietType::Vegetarian => "vegetarian",
            DietType::Vegan => "vegan",
            DietType::NonVegetarian => "non_vegetarian",
        }
    }

    /// Whether someone following `self` can eat an item of diet `item`.
    ///
    /// Vegetarian and vegan requests only accept their own diet; non-vegetarian accepts anything.
    pub fn accepts(self, item: DietType) -> bool {
        match self {
            DietType::NonVegetarian => true,
            own => own == item,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthGoal {
    #[serde(rename = "lose_weight", alias = "weight_loss")]
    LoseWeight,
    #[serde(rename = "gain_weight", alias = "weight_gain")]
    GainWeight,
    #[serde(rename = "maintain", alias = "maintain_weight")]
    Maintain,
}

impl HealthGoal {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthGoal::LoseWeight => "lose_weight",
            HealthGoal::GainWeight => "gain_weight",
            HealthGoal::Maintain => "maintain",
        }
    }
}

/// Parses the serialized names (and their aliases) of the unit enums above.
macro_rules! from_str_via_serde {
    ($($ty:ty),+) => {$(
        impl FromStr for $ty {
            type Err = serde_json::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                serde_json::from_value(Value::String(s.trim().to_ascii_lowercase()))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    )+};
}

from_str_via_serde!(Level, BmiCategory, MedicalCondition, DietType, HealthGoal);

/// Who an item is meant for. Empty lists mean "anyone".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suitability {
    #[serde(default)]
    pub bmi_categories: Vec<BmiCategory>,
    #[serde(default)]
    pub medical_conditions: Vec<MedicalCondition>,
}

impl Suitability {
    /// Store-side matching: empty lists match everything, and items tagged `none` are
    /// considered safe for any condition.
    pub fn admits(&self, bmi: BmiCategory, condition: MedicalCondition) -> bool {
        let bmi_ok = self.bmi_categories.is_empty() || self.bmi_categories.contains(&bmi);
        let condition_ok = self.medical_conditions.is_empty()
            || self.medical_conditions.contains(&condition)
            || self.medical_conditions.contains(&MedicalCondition::None);
        bmi_ok && condition_ok
    }

    /// Both the category and the condition are listed explicitly.
    pub fn lists(&self, bmi: BmiCategory, condition: MedicalCondition) -> bool {
        self.bmi_categories.contains(&bmi) && self.medical_conditions.contains(&condition)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub item_id: String,
    pub item_name: String,
    pub calories: u32,
    pub spice_level: Level,
    pub oil_level: Level,
    pub diet_type: DietType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub suitable_for: Suitability,
}

impl MenuItem {
    /// Decode a stored item. Undecodable data is a `Malformed` store error.
    pub fn from_item(item: &Item, operation: &str, table: &str) -> Result<Self, StoreError> {
        serde_json::from_value(Value::Object(item.clone())).map_err(|e| {
            StoreError::malformed(operation, table, format!("undecodable menu item: {e}"))
        })
    }

    pub fn to_item(&self) -> Item {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Item::new(),
        }
    }

    /// Low calorie, low oil and low spice.
    pub fn is_light(&self) -> bool {
        self.calories < 150 && self.oil_level == Level::Low && self.spice_level == Level::Low
    }

    /// Primary-tier suitability for `profile`.
    pub fn suits(&self, profile: &Profile) -> bool {
        self.suitable_for.admits(profile.bmi_category, profile.medical_condition)
            && self.spice_level <= profile.spice_tolerance
            && profile.diet_type.accepts(self.diet_type)
    }
}

/// Names of the items recommended for one (BMI category, condition) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRule {
    pub rule_id: String,
    pub bmi_category: BmiCategory,
    pub medical_condition: MedicalCondition,
    #[serde(default)]
    pub allowed_items: Vec<String>,
}

impl HealthRule {
    /// Store key of the rule for a pair: `"{bmi_category}_{medical_condition}"`.
    pub fn id_for(bmi: BmiCategory, condition: MedicalCondition) -> String {
        format!("{bmi}_{condition}")
    }

    pub fn from_item(item: &Item, operation: &str, table: &str) -> Result<Self, StoreError> {
        serde_json::from_value(Value::Object(item.clone())).map_err(|e| {
            StoreError::malformed(operation, table, format!("undecodable health rule: {e}"))
        })
    }

    pub fn to_item(&self) -> Item {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Item::new(),
        }
    }
}

fn default_spice() -> Level {
    Level::Medium
}

fn default_age() -> u32 {
    25
}

fn default_weight() -> f64 {
    70.0
}

fn default_height() -> f64 {
    170.0
}

/// Input to a suggestion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub bmi: f64,
    pub bmi_category: BmiCategory,
    pub medical_condition: MedicalCondition,
    pub health_goal: HealthGoal,
    pub diet_type: DietType,
    #[serde(default = "default_spice")]
    pub spice_tolerance: Level,
    #[serde(default = "default_age")]
    pub age: u32,
    #[serde(default = "default_weight")]
    pub weight_kg: f64,
    #[serde(default = "default_height")]
    pub height_cm: f64,
}

impl Profile {
    /// Medium spice tolerance, age 25, 70 kg and 170 cm unless overridden.
    pub fn new(
        bmi: f64,
        bmi_category: BmiCategory,
        medical_condition: MedicalCondition,
        health_goal: HealthGoal,
        diet_type: DietType,
    ) -> Self {
        Self {
            bmi,
            bmi_category,
            medical_condition,
            health_goal,
            diet_type,
            spice_tolerance: default_spice(),
            age: default_age(),
            weight_kg: default_weight(),
            height_cm: default_height(),
        }
    }

    /// Derive BMI and category from body measurements.
    pub fn from_measurements(
        height_cm: f64,
        weight_kg: f64,
        medical_condition: MedicalCondition,
        health_goal: HealthGoal,
        diet_type: DietType,
    ) -> Option<Self> {
        let (bmi, category) = calculate_bmi(height_cm, weight_kg)?;
        let mut profile = Self::new(bmi, category, medical_condition, health_goal, diet_type);
        profile.height_cm = height_cm;
        profile.weight_kg = weight_kg;
        Some(profile)
    }

    pub fn with_spice_tolerance(mut self, tolerance: Level) -> Self {
        self.spice_tolerance = tolerance;
        self
    }

    pub fn with_age(mut self, age: u32) -> Self {
        self.age = age;
        self
    }

    /// Cache key over every field that influences the suggestion except the raw BMI.
    ///
    /// Equal profiles give equal keys; changing any keyed field changes the key.
    pub fn cache_key(&self) -> String {
        format!(
            "suggestion:{}:{}:{}:{}:{}:{}:{}:{}",
            self.bmi_category,
            self.medical_condition,
            self.health_goal,
            self.diet_type,
            self.spice_tolerance,
            self.age,
            self.weight_kg,
            self.height_cm
        )
    }
}

/// An item as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDetails {
    pub item_id: String,
    pub item_name: String,
    pub calories: u32,
    pub spice_level: Level,
    pub oil_level: Level,
    pub diet_type: DietType,
    pub image_url: Option<String>,
    pub suitable_for: Suitability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub item_id: String,
    pub item_name: String,
    pub calories: u32,
    pub spice_level: Level,
    pub oil_level: Level,
    pub diet_type: DietType,
    pub image_url: Option<String>,
    pub recommendation_reason: String,
    pub health_benefits: String,
    pub health_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Recommendation {
    /// Display details, tagged as suitable for the requesting profile.
    pub fn details(&self, profile: &Profile) -> ItemDetails {
        ItemDetails {
            item_id: self.item_id.clone(),
            item_name: self.item_name.clone(),
            calories: self.calories,
            spice_level: self.spice_level,
            oil_level: self.oil_level,
            diet_type: self.diet_type,
            image_url: self.image_url.clone(),
            suitable_for: Suitability {
                bmi_categories: vec![profile.bmi_category],
                medical_conditions: vec![profile.medical_condition],
            },
        }
    }
}

/// Response to a suggestion request. Every degradation tier produces this same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub health_summary: String,
    pub bmi_category: BmiCategory,
    pub suggested_item: String,
    pub suggested_item_details: Option<ItemDetails>,
    pub similar_items: Vec<ItemDetails>,
    pub reason: String,
    pub recommendations: Vec<Recommendation>,
    pub fallback_mode: bool,
    pub emergency_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
