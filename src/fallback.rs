//! Static safe data used when the store cannot be reached.

use std::fmt;
use tracing::warn;

use crate::error::ServiceError;
use crate::menu::{
    BmiCategory, DietType, HealthRule, Level, MedicalCondition, MenuItem, Suitability,
};

/// Most items a fallback query returns.
const MAX_FALLBACK_ITEMS: usize = 5;
/// Most items returned when nothing matches and only the safest options are offered.
const MAX_SAFEST_ITEMS: usize = 3;

/// Source of degraded-mode items and rules.
///
/// Errors push the recommender down to its emergency tier.
pub trait FallbackSource: Send + Sync + fmt::Debug {
    fn items(
        &self,
        bmi: BmiCategory,
        condition: MedicalCondition,
        diet: DietType,
        spice_tolerance: Level,
    ) -> Result<Vec<MenuItem>, ServiceError>;

    fn rule(
        &self,
        bmi: BmiCategory,
        condition: MedicalCondition,
    ) -> Result<Option<HealthRule>, ServiceError>;
}

/// Built-in, hand-curated fallback data.
#[derive(Debug, Clone)]
pub struct StaticFallback {
    items: Vec<MenuItem>,
    rules: Vec<HealthRule>,
}

impl Default for StaticFallback {
    fn default() -> Self {
        Self::with_data(default_items(), default_rules())
    }
}

impl StaticFallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(items: Vec<MenuItem>, rules: Vec<HealthRule>) -> Self {
        Self { items, rules }
    }

    pub fn all_items(&self) -> &[MenuItem] {
        &self.items
    }

    pub fn all_rules(&self) -> &[HealthRule] {
        &self.rules
    }

    fn find_rule(&self, bmi: BmiCategory, condition: MedicalCondition) -> Option<&HealthRule> {
        let find = |b: BmiCategory, c: MedicalCondition| {
            self.rules.iter().find(|r| r.bmi_category == b && r.medical_condition == c)
        };
        find(bmi, condition)
            .or_else(|| find(bmi, MedicalCondition::None))
            .or_else(|| find(BmiCategory::Normal, condition))
            .or_else(|| find(BmiCategory::Obese, MedicalCondition::None))
            .or_else(|| self.rules.first())
    }
}

impl FallbackSource for StaticFallback {
    fn items(
        &self,
        bmi: BmiCategory,
        condition: MedicalCondition,
        diet: DietType,
        spice_tolerance: Level,
    ) -> Result<Vec<MenuItem>, ServiceError> {
        warn!(
            bmi = %bmi,
            condition = %condition,
            diet = %diet,
            spice = %spice_tolerance,
            "serving fallback menu items"
        );
        let suitable: Vec<MenuItem> = self
            .items
            .iter()
            .filter(|item| diet.accepts(item.diet_type))
            .filter(|item| item.suitable_for.lists(bmi, condition))
            .filter(|item| !(spice_tolerance == Level::Low && item.spice_level == Level::High))
            .take(MAX_FALLBACK_ITEMS)
            .cloned()
            .collect();
        if !suitable.is_empty() {
            return Ok(suitable);
        }

        warn!("no fallback items match, returning safest options");
        Ok(self
            .items
            .iter()
            .filter(|item| {
                item.spice_level == Level::Low
                    && item.oil_level == Level::Low
                    && item.diet_type == DietType::Vegetarian
            })
            .take(MAX_SAFEST_ITEMS)
            .cloned()
            .collect())
    }

    /// Precedence: exact pair, then the category with no condition, then the condition for a
    /// normal BMI, then the obese/no-condition rule, then the first rule.
    fn rule(
        &self,
        bmi: BmiCategory,
        condition: MedicalCondition,
    ) -> Result<Option<HealthRule>, ServiceError> {
        warn!(bmi = %bmi, condition = %condition, "serving fallback health rule");
        Ok(self.find_rule(bmi, condition).cloned())
    }
}

fn fallback_item(
    id: &str,
    name: &str,
    calories: u32,
    oil: Level,
    bmi: &[BmiCategory],
    conditions: &[MedicalCondition],
) -> MenuItem {
    MenuItem {
        item_id: id.to_string(),
        item_name: name.to_string(),
        calories,
        spice_level: Level::Low,
        oil_level: oil,
        diet_type: DietType::Vegetarian,
        image_url: None,
        suitable_for: Suitability {
            bmi_categories: bmi.to_vec(),
            medical_conditions: conditions.to_vec(),
        },
    }
}

fn default_items() -> Vec<MenuItem> {
    use BmiCategory::*;
    use MedicalCondition::{Acidity, Bp, Diabetes};
    let none = MedicalCondition::None;

    vec![
        fallback_item(
            "fallback_idli",
            "Plain Idli",
            58,
            Level::Low,
            &[Underweight, Normal, Overweight, Obese],
            &[none, Diabetes, Bp, Acidity],
        ),
        fallback_item(
            "fallback_dosa",
            "Plain Dosa",
            133,
            Level::Medium,
            &[Underweight, Normal, Overweight],
            &[none, Bp],
        ),
        fallback_item(
            "fallback_pongal",
            "Ven Pongal",
            178,
            Level::Medium,
            &[Underweight, Normal],
            &[none],
        ),
        fallback_item(
            "fallback_upma",
            "Rava Upma",
            210,
            Level::Medium,
            &[Underweight, Normal],
            &[none, Acidity],
        ),
        fallback_item(
            "fallback_curd_rice",
            "Curd Rice",
            146,
            Level::Low,
            &[Normal, Overweight, Obese],
            &[none, Diabetes, Bp, Acidity],
        ),
    ]
}

fn default_rules() -> Vec<HealthRule> {
    let rule = |id: &str, bmi, condition, allowed: &[&str]| HealthRule {
        rule_id: id.to_string(),
        bmi_category: bmi,
        medical_condition: condition,
        allowed_items: allowed.iter().map(|s| s.to_string()).collect(),
    };
    vec![
        rule(
            "fallback_normal_none",
            BmiCategory::Normal,
            MedicalCondition::None,
            &["prefer_balanced", "prefer_low_oil"],
        ),
        rule(
            "fallback_diabetes",
            BmiCategory::Normal,
            MedicalCondition::Diabetes,
            &["avoid_sweet", "prefer_low_oil", "prefer_high_fiber"],
        ),
        rule(
            "fallback_bp",
            BmiCategory::Normal,
            MedicalCondition::Bp,
            &["prefer_low_salt", "prefer_low_oil"],
        ),
        rule(
            "fallback_acidity",
            BmiCategory::Normal,
            MedicalCondition::Acidity,
            &["prefer_low_spice", "prefer_low_oil"],
        ),
        rule(
            "fallback_obese",
            BmiCategory::Obese,
            MedicalCondition::None,
            &["prefer_very_low_calorie", "prefer_low_oil"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[MenuItem]) -> Vec<&str> {
        items.iter().map(|i| i.item_name.as_str()).collect()
    }

    #[test]
    fn filters_by_listed_suitability() {
        let fallback = StaticFallback::new();
        let items = fallback
            .items(
                BmiCategory::Overweight,
                MedicalCondition::Diabetes,
                DietType::Vegetarian,
                Level::Medium,
            )
            .unwrap();
        assert_eq!(names(&items), vec!["Plain Idli", "Curd Rice"]);

        let items = fallback
            .items(BmiCategory::Normal, MedicalCondition::None, DietType::Vegetarian, Level::Low)
            .unwrap();
        assert_eq!(items.len(), 5);
    }

    #[test]
    fn vegan_request_gets_safest_options() {
        let items = StaticFallback::new()
            .items(BmiCategory::Normal, MedicalCondition::None, DietType::Vegan, Level::Medium)
            .unwrap();
        assert_eq!(names(&items), vec!["Plain Idli", "Curd Rice"]);
    }

    #[test]
    fn non_vegetarian_accepts_vegetarian_items() {
        let items = StaticFallback::new()
            .items(BmiCategory::Obese, MedicalCondition::Bp, DietType::NonVegetarian, Level::High)
            .unwrap();
        assert_eq!(names(&items), vec!["Plain Idli", "Curd Rice"]);
    }

    #[test]
    fn low_tolerance_drops_high_spice() {
        let mut hot = StaticFallback::new().all_items()[0].clone();
        hot.item_name = "Pepper Idli".into();
        hot.spice_level = Level::High;
        let mild = StaticFallback::new().all_items()[4].clone();
        let fallback = StaticFallback::with_data(vec![hot, mild], Vec::new());

        let items = fallback
            .items(BmiCategory::Normal, MedicalCondition::Bp, DietType::Vegetarian, Level::Low)
            .unwrap();
        assert_eq!(names(&items), vec!["Curd Rice"]);
        let items = fallback
            .items(BmiCategory::Normal, MedicalCondition::Bp, DietType::Vegetarian, Level::Medium)
            .unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn rule_precedence() {
        let fallback = StaticFallback::new();
        let id = |bmi, condition| fallback.rule(bmi, condition).unwrap().unwrap().rule_id;

        assert_eq!(id(BmiCategory::Normal, MedicalCondition::Bp), "fallback_bp");
        assert_eq!(id(BmiCategory::Obese, MedicalCondition::Diabetes), "fallback_obese");
        assert_eq!(id(BmiCategory::Overweight, MedicalCondition::Diabetes), "fallback_diabetes");
        assert_eq!(id(BmiCategory::Underweight, MedicalCondition::None), "fallback_normal_none");

        let only_bp = StaticFallback::with_data(
            Vec::new(),
            vec![fallback.all_rules()[2].clone()],
        );
        assert_eq!(
            only_bp.rule(BmiCategory::Obese, MedicalCondition::Acidity).unwrap().unwrap().rule_id,
            "fallback_bp"
        );
        let empty = StaticFallback::with_data(Vec::new(), Vec::new());
        assert_eq!(empty.rule(BmiCategory::Normal, MedicalCondition::None).unwrap(), None);
    }
}
