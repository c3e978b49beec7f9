use menuguard::menu::{
    BmiCategory, DietType, HealthRule, Level, MedicalCondition, MenuItem, Profile, Suitability,
};
use menuguard::store::tables;
use menuguard::{
    CacheConfig, FallbackSource, InMemoryBreakerRegistry, InMemoryStore, InstantSleeper,
    KeyValueStore, Recommender, ResilientCaller, ServiceError, Settings, StaticFallback,
    SuggestionSettings, TrackingSleeper, TtlCache,
};

pub fn menu_item(
    id: &str,
    name: &str,
    calories: u32,
    spice: Level,
    oil: Level,
    diet: DietType,
) -> MenuItem {
    MenuItem {
        item_id: id.into(),
        item_name: name.into(),
        calories,
        spice_level: spice,
        oil_level: oil,
        diet_type: diet,
        image_url: None,
        suitable_for: Suitability::default(),
    }
}

/// A small breakfast menu plus the rule for overweight diners with diabetes.
pub async fn seeded_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    let mut pesarattu =
        menu_item("m6", "Pesarattu", 120, Level::Medium, Level::Low, DietType::Vegan);
    pesarattu.suitable_for.bmi_categories = vec![BmiCategory::Overweight, BmiCategory::Obese];
    let menu = [
        menu_item("m1", "Steamed Idli", 58, Level::Low, Level::Low, DietType::Vegetarian),
        menu_item("m2", "Masala Dosa", 168, Level::Medium, Level::Medium, DietType::Vegetarian),
        menu_item("m3", "Ragi Dosa", 110, Level::Low, Level::Low, DietType::Vegetarian),
        menu_item("m4", "Egg Curry", 280, Level::High, Level::High, DietType::NonVegetarian),
        menu_item("m5", "Medu Vada", 310, Level::Medium, Level::High, DietType::Vegetarian),
        pesarattu,
    ];
    for item in &menu {
        store.put(tables::MENU_ITEMS, item.to_item()).await.unwrap();
    }
    let rule = HealthRule {
        rule_id: HealthRule::id_for(BmiCategory::Overweight, MedicalCondition::Diabetes),
        bmi_category: BmiCategory::Overweight,
        medical_condition: MedicalCondition::Diabetes,
        allowed_items: vec!["Steamed Idli".into(), "Ragi Dosa".into(), "Masala Dosa".into()],
    };
    store.put(tables::HEALTH_RULES, rule.to_item()).await.unwrap();
    store
}

pub fn caller(registry: &InMemoryBreakerRegistry, settings: &Settings) -> ResilientCaller {
    ResilientCaller::with_sleeper(registry.clone(), settings, InstantSleeper).unwrap()
}

/// A caller whose backoff waits are recorded instead of slept.
pub fn tracked_caller(
    registry: &InMemoryBreakerRegistry,
    settings: &Settings,
) -> (ResilientCaller, TrackingSleeper) {
    let sleeper = TrackingSleeper::new();
    let caller =
        ResilientCaller::with_sleeper(registry.clone(), settings, sleeper.clone()).unwrap();
    (caller, sleeper)
}

pub fn recommender_with<K, F>(
    store: K,
    registry: &InMemoryBreakerRegistry,
    cache: TtlCache<menuguard::menu::Suggestion>,
    fallback: F,
) -> Recommender
where
    K: KeyValueStore + 'static,
    F: FallbackSource + 'static,
{
    let settings = Settings::default();
    Recommender::new(
        store,
        caller(registry, &settings),
        cache,
        fallback,
        SuggestionSettings::default(),
    )
}

pub fn recommender(store: InMemoryStore, registry: &InMemoryBreakerRegistry) -> Recommender {
    let cache = TtlCache::new(CacheConfig::default()).unwrap();
    recommender_with(store, registry, cache, StaticFallback::new())
}

/// Overweight, diabetic, vegetarian, medium spice, trying to lose weight. Parsed from the
/// request spellings clients send.
pub fn diabetic_profile() -> Profile {
    serde_json::from_value(serde_json::json!({
        "bmi": 27.8,
        "bmi_category": "overweight",
        "medical_condition": "diabetes",
        "health_goal": "weight_loss",
        "diet_type": "veg",
        "spice_tolerance": "medium",
    }))
    .unwrap()
}

/// Fallback source whose data is unavailable.
#[derive(Debug)]
pub struct BrokenFallback;

impl FallbackSource for BrokenFallback {
    fn items(
        &self,
        _: BmiCategory,
        _: MedicalCondition,
        _: DietType,
        _: Level,
    ) -> Result<Vec<MenuItem>, ServiceError> {
        Err(ServiceError::Unavailable("fallback data unavailable".into()))
    }

    fn rule(
        &self,
        _: BmiCategory,
        _: MedicalCondition,
    ) -> Result<Option<HealthRule>, ServiceError> {
        Err(ServiceError::Unavailable("fallback data unavailable".into()))
    }
}
