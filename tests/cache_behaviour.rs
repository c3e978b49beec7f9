mod common;

use common::test_helpers;
use futures::future::join_all;
use menuguard::health::cache_health;
use menuguard::menu::Suggestion;
use menuguard::recommender::SUGGESTION_PREFIX;
use menuguard::{
    CacheConfig, EvictionStrategy, HealthStatus, InMemoryBreakerRegistry, ManualClock,
    StaticFallback, Tier, TtlCache,
};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_suggestions_share_one_bounded_cache() {
    let store = test_helpers::seeded_store().await;
    let registry = InMemoryBreakerRegistry::new();
    let cache: TtlCache<Suggestion> =
        TtlCache::new(CacheConfig { max_size: 4, ..CacheConfig::default() }).unwrap();
    let recommender =
        test_helpers::recommender_with(store, &registry, cache.clone(), StaticFallback::new());

    let requests = (0..16u32).map(|age| {
        let recommender = recommender.clone();
        tokio::spawn(async move {
            let profile = test_helpers::diabetic_profile().with_age(20 + age);
            recommender.suggest_with_tier(&profile).await
        })
    });
    let answers = join_all(requests).await;

    for answer in answers {
        let (suggestion, tier) = answer.unwrap();
        assert_eq!(tier, Tier::Primary);
        assert_eq!(suggestion.suggested_item, "Steamed Idli");
    }
    let stats = cache.stats();
    assert_eq!(stats.size, 4);
    assert_eq!(stats.sets, 16);
    assert_eq!(stats.evictions, 12);
    assert_eq!(cache.keys(Some(SUGGESTION_PREFIX)).len(), 4);
}

#[tokio::test]
async fn repeated_profiles_hit_the_cache() {
    let registry = InMemoryBreakerRegistry::new();
    let recommender = test_helpers::recommender(test_helpers::seeded_store().await, &registry);
    let profile = test_helpers::diabetic_profile();

    let first = recommender.suggest(&profile).await;
    for _ in 0..9 {
        assert_eq!(recommender.suggest(&profile).await, first);
    }
    let stats = recommender.cache().stats();
    assert_eq!((stats.hits, stats.misses, stats.sets), (9, 1, 1));
    assert!((stats.hit_rate - 90.0).abs() < 1e-9);
}

#[test]
fn suggestions_live_in_their_own_namespace() {
    let cache: TtlCache<String> = TtlCache::new(CacheConfig::default()).unwrap();
    cache.set("suggestion:normal:none", "idli".into(), None, Some(SUGGESTION_PREFIX));
    cache.set("suggestion:obese:bp", "curd rice".into(), None, Some(SUGGESTION_PREFIX));
    cache.set("menu:all", "menu".into(), None, Some("menu"));

    assert_eq!(
        cache.keys(Some(SUGGESTION_PREFIX)),
        vec!["suggestions:suggestion:normal:none", "suggestions:suggestion:obese:bp"]
    );
    assert_eq!(cache.clear(Some(SUGGESTION_PREFIX)), 2);
    assert_eq!(cache.keys(None), vec!["menu:menu:all"]);
    assert_eq!(cache.get("menu:all", Some("menu")).as_deref(), Some("menu"));
}

#[test]
fn lfu_keeps_popular_profiles() {
    let clock = ManualClock::new();
    let config =
        CacheConfig { max_size: 3, strategy: EvictionStrategy::Lfu, ..CacheConfig::default() };
    let cache = TtlCache::with_clock(config, clock).unwrap();
    for key in ["popular", "steady", "rare"] {
        cache.set(key, key.len(), None, None);
    }
    for _ in 0..5 {
        cache.get("popular", None);
    }
    cache.get("steady", None);

    cache.set("newcomer", 8, None, None);
    assert_eq!(cache.keys(None), vec!["newcomer", "popular", "steady"]);
}

#[tokio::test(start_paused = true)]
async fn sweeper_state_feeds_cache_health() {
    let clock = ManualClock::new();
    let config = CacheConfig {
        default_ttl: Duration::from_secs(10),
        cleanup_interval: Duration::from_secs(30),
        ..CacheConfig::default()
    };
    let cache: TtlCache<u32> = TtlCache::with_clock(config, clock.clone()).unwrap();
    assert_eq!(cache_health(&cache.stats()).status, HealthStatus::Degraded);

    assert!(cache.start());
    assert!(cache.stats().sweeper_running);
    assert_eq!(cache_health(&cache.stats()).status, HealthStatus::Healthy);

    for i in 0..5 {
        cache.set(&format!("k{i}"), i, None, None);
    }
    cache.set("long", 99, Some(Duration::from_secs(600)), None);
    clock.advance(Duration::from_secs(11));
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(cache.keys(None), vec!["long"]);
    assert_eq!(cache.stats().evictions, 5);

    cache.stop().await;
    assert!(!cache.stats().sweeper_running);
    let health = cache_health(&cache.stats());
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.message, "cleanup task is not running");

    assert!(cache.start(), "a stopped sweeper can be restarted");
    cache.stop().await;
}
