//! Cross-tier read/write behaviour of the cache manager

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tiercache_core::service::statistics::AVERAGE_ENTRY_BYTES;
use tiercache_core::service::FixedProbe;
use tiercache_core::{CacheConfig, CacheError, CacheKey, CacheLevel, CacheManager, LevelStore, StoreError};

/// Store whose writes always fail
struct FailingStore;

impl LevelStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    fn get(&self, _key: &str) -> tiercache_store::Result<Option<Value>> {
        Ok(None)
    }

    fn put(&self, _key: &str, _value: &Value, _ttl: Option<Duration>, _tags: &BTreeSet<String>) -> tiercache_store::Result<()> {
        Err(StoreError::backend("disk full"))
    }

    fn forget(&self, _key: &str) -> tiercache_store::Result<bool> {
        Ok(false)
    }

    fn flush(&self) -> tiercache_store::Result<()> {
        Ok(())
    }

    fn increment(&self, _key: &str, _by: i64) -> tiercache_store::Result<i64> {
        Err(StoreError::backend("disk full"))
    }
}

/// Store that can list identifiers but cannot measure itself
#[derive(Default)]
struct KeyListingStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl LevelStore for KeyListingStore {
    fn name(&self) -> &str {
        "key-listing"
    }

    fn get(&self, key: &str) -> tiercache_store::Result<Option<Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &Value, _ttl: Option<Duration>, _tags: &BTreeSet<String>) -> tiercache_store::Result<()> {
        self.entries.lock().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn forget(&self, key: &str) -> tiercache_store::Result<bool> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    fn flush(&self) -> tiercache_store::Result<()> {
        self.entries.lock().clear();
        Ok(())
    }

    fn increment(&self, _key: &str, _by: i64) -> tiercache_store::Result<i64> {
        Err(StoreError::Unsupported("counters"))
    }

    fn keys(&self) -> tiercache_store::Result<Vec<String>> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}

fn manager() -> CacheManager {
    CacheManager::builder()
        .in_memory_database()
        .memory_probe(Arc::new(FixedProbe::new(1 << 20)))
        .build()
        .unwrap()
}

#[test]
fn test_empty_namespace_fails_validation() {
    let cache = manager();
    let key = CacheKey::new("ip:198.51.100.1").with_namespace("");
    let report = cache.validate_key(key.clone());
    assert!(report.has("namespace_required"));
    assert!(!key.is_valid());

    // invalid keys are never written
    assert!(!cache.put(key, "value"));
}

#[test]
fn test_round_trip_at_each_level() {
    let cache = manager();
    for level in CacheLevel::ALL {
        let key = format!("roundtrip:{}", level);
        assert!(cache.put_at(key.as_str(), json!({"level": level.as_str()}), Some(60), &[level]));
        assert_eq!(cache.get_at(key.as_str(), &[level]), Some(json!({"level": level.as_str()})));
    }
}

#[test]
fn test_slow_tier_hit_backfills_faster_tiers() {
    let cache = manager();
    assert!(cache.put_at("geo:nl", "Netherlands", None, &[CacheLevel::Database]));
    assert_eq!(cache.get_from_request("geo:nl"), None);
    assert_eq!(cache.get_from_memory("geo:nl"), None);

    assert_eq!(cache.get("geo:nl"), Some(json!("Netherlands")));

    assert_eq!(cache.get_from_request("geo:nl"), Some(json!("Netherlands")));
    assert_eq!(cache.get_from_memory("geo:nl"), Some(json!("Netherlands")));
    let stats = cache.stats();
    assert_eq!(stats.levels[&CacheLevel::Database].hits, 1);
}

#[test]
fn test_backfill_stays_within_requested_levels() {
    let cache = manager();
    cache.put_at("k", 1, None, &[CacheLevel::Database]);
    assert_eq!(cache.get_at("k", &[CacheLevel::Memory, CacheLevel::Database]), Some(json!(1)));
    assert_eq!(cache.get_from_memory("k"), Some(json!(1)));
    assert_eq!(cache.get_from_request("k"), None);
}

#[test]
fn test_put_to_memory_and_database_only() {
    let cache = manager();
    assert!(cache.put_at("k", "v", Some(3600), &[CacheLevel::Memory, CacheLevel::Database]));
    assert_eq!(cache.get_from_request("k"), None);
    assert_eq!(cache.get_from_memory("k"), Some(json!("v")));
    assert_eq!(cache.get_from_database("k"), Some(json!("v")));
}

#[test]
fn test_disabled_level_is_skipped() {
    let cache = manager();
    cache.put_at("score", 0.4, None, &[CacheLevel::Memory]);

    cache.toggle_level(CacheLevel::Memory, false);
    assert!(!cache.is_level_enabled(CacheLevel::Memory));
    assert_eq!(cache.get("score"), None);
    assert_eq!(cache.get_from_memory("score"), None);
    assert_eq!(cache.configuration().unwrap()["levels"]["memory"]["enabled"], json!(false));

    cache.toggle_level(CacheLevel::Memory, true);
    assert_eq!(cache.get("score"), Some(json!(0.4)));
}

#[test]
fn test_null_values_are_absent() {
    let cache = manager();
    assert!(!cache.put("nothing", Value::Null));
    assert!(!cache.has("nothing"));
}

#[test]
fn test_partial_write_failure_keeps_successful_levels() {
    let cache = CacheManager::builder()
        .store(CacheLevel::Database, Arc::new(FailingStore))
        .memory_probe(Arc::new(FixedProbe::default()))
        .build()
        .unwrap();

    assert!(!cache.put("blocklist:v1", json!(["spam.example"])));
    assert_eq!(cache.get_from_memory("blocklist:v1"), Some(json!(["spam.example"])));
    assert_eq!(cache.stats().puts, 1);
}

#[test]
fn test_forget_counts_once_per_call() {
    let cache = manager();
    cache.put("k", 1);
    assert!(cache.forget("k"));
    assert!(!cache.forget("k"));
    assert_eq!(cache.stats().deletes, 2);
}

#[test]
fn test_remember_invokes_producer_once() {
    let cache = manager();
    let mut calls = 0;
    let first = cache.remember("rate:203.0.113.7", Some(60), || {
        calls += 1;
        json!(17)
    });
    assert_eq!(first, json!(17));

    let second = cache.remember("rate:203.0.113.7", Some(60), || json!(99));
    assert_eq!(second, json!(17));
    assert_eq!(calls, 1);
}

#[test]
fn test_try_remember_does_not_cache_failures() {
    let cache = manager();
    let result = cache.try_remember("lookup", None, || Err(anyhow::anyhow!("upstream timeout")));
    assert!(result.is_err());
    assert!(!cache.has("lookup"));

    let value = cache.try_remember("lookup", None, || Ok(json!("ok"))).unwrap();
    assert_eq!(value, json!("ok"));
    assert!(cache.has("lookup"));
}

#[test]
fn test_remember_forever_uses_level_maximum() {
    let cache = manager();
    let value = cache.remember_forever("config:weights", || json!({"bayes": 0.7}));
    assert_eq!(value, json!({"bayes": 0.7}));
    assert_eq!(cache.get("config:weights"), Some(json!({"bayes": 0.7})));
}

#[test]
fn test_add_only_when_absent() {
    let cache = manager();
    assert!(cache.add("lock:job", "first", None));
    assert!(!cache.add("lock:job", "second", None));
    assert_eq!(cache.get("lock:job"), Some(json!("first")));
}

#[test]
fn test_many_omits_misses() {
    let cache = manager();
    cache.put("a", 1);
    cache.put("b", 2);

    let found = cache.many(["a", "b", "missing"]);
    assert_eq!(found.len(), 2);
    assert_eq!(found["a"], json!(1));
    assert!(!found.contains_key("missing"));
}

#[test]
fn test_many_keeps_namespaces_apart() {
    let cache = manager();
    cache.put(CacheKey::new("k").with_namespace("scores"), 1);
    cache.put(CacheKey::new("k").with_namespace("geo"), 2);
    cache.put("solo", 3);

    let found = cache.many([
        CacheKey::new("k").with_namespace("scores"),
        CacheKey::new("k").with_namespace("geo"),
        CacheKey::new("solo"),
    ]);
    assert_eq!(found.len(), 3);
    assert_eq!(found["cache:scores:k"], json!(1));
    assert_eq!(found["cache:geo:k"], json!(2));
    assert_eq!(found["solo"], json!(3));
}

#[test]
fn test_put_many_isolates_failures() {
    let cache = manager();
    let mut bad = BTreeMap::new();
    bad.insert(vec![1u8], 1u8);

    let report = cache.put_many(
        vec![
            ("good", BTreeMap::new()),
            ("bad", bad),
            ("also-good", BTreeMap::new()),
        ],
        Some(60),
    );

    assert_eq!(report.stored, vec!["good".to_string(), "also-good".to_string()]);
    assert!(report.failed["bad"].contains("serialization"));
    assert_eq!(cache.get("also-good"), Some(json!({})));
}

#[test]
fn test_increment_at_authoritative_level() {
    let cache = manager();
    assert_eq!(cache.increment("hits:today", 1).unwrap(), 1);
    assert_eq!(cache.increment("hits:today", 4).unwrap(), 5);
    assert_eq!(cache.decrement("hits:today", 2).unwrap(), 3);

    assert_eq!(cache.get_from_database("hits:today"), Some(json!(3)));
    assert_eq!(cache.get("hits:today"), Some(json!(3)));
    assert_eq!(cache.get_from_memory("hits:today"), Some(json!(3)));

    // a cached copy in a faster level is dropped by the next increment
    assert_eq!(cache.increment("hits:today", 1).unwrap(), 4);
    assert_eq!(cache.get_from_memory("hits:today"), None);
}

#[test]
fn test_decrement_by_minimum_saturates() {
    let cache = manager();
    assert_eq!(cache.decrement("floor", i64::MIN).unwrap(), i64::MAX);
    assert_eq!(cache.increment("floor", 1).unwrap(), i64::MAX);
}

#[test]
fn test_increment_non_numeric() {
    let cache = manager();
    cache.put("label", "not a number");
    match cache.increment("label", 1) {
        Err(CacheError::NotNumeric(key)) => assert_eq!(key, "label"),
        other => panic!("expected NotNumeric, got {:?}", other),
    }
}

#[test]
fn test_increment_without_levels() {
    let cache = manager();
    for level in CacheLevel::ALL {
        cache.toggle_level(level, false);
    }
    assert!(matches!(cache.increment("k", 1), Err(CacheError::NoLevel(_))));
}

#[test]
fn test_hit_and_miss_ratio_sum_to_hundred() {
    let cache = manager();
    let stats = cache.stats();
    assert_eq!((stats.hit_ratio, stats.miss_ratio), (0.0, 0.0));

    cache.put("k", 1);
    cache.get("k");
    cache.get("missing");
    cache.get("missing-too");

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
    assert!((stats.hit_ratio + stats.miss_ratio - 100.0).abs() < 1e-9);
    assert_eq!(stats.hit_ratio, 33.33);
}

#[test]
fn test_reset_stats_zeroes_counters() {
    let cache = manager();
    cache.put("k", 1);
    cache.get("k");
    cache.get("missing");
    cache.forget("k");

    cache.reset_stats();
    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.puts, stats.deletes), (0, 0, 0, 0));
    assert_eq!(stats.memory.samples, 0);
}

#[test]
fn test_memory_samples_and_size_estimates() {
    let probe = Arc::new(FixedProbe::new(1000));
    let cache = CacheManager::builder()
        .in_memory_database()
        .memory_probe(probe.clone())
        .build()
        .unwrap();

    cache.put("a", 1);
    probe.set(Some(2000));
    cache.put("b", 2);
    cache.get("a");
    cache.get("b");

    let stats = cache.stats();
    assert_eq!(stats.memory.current_bytes, 2000);
    assert_eq!(stats.memory.peak_bytes, 2000);
    assert_eq!(stats.memory.trend, tiercache_core::MemoryTrend::Increasing);
    assert_eq!(stats.levels[&CacheLevel::Memory].entries, Some(2));
    assert!(stats.levels[&CacheLevel::Database].estimated_size_bytes > 0);
}

#[test]
fn test_size_estimate_falls_back_to_key_count() {
    let cache = CacheManager::builder()
        .store(CacheLevel::Memory, Arc::new(KeyListingStore::default()))
        .in_memory_database()
        .memory_probe(Arc::new(FixedProbe::default()))
        .build()
        .unwrap();
    cache.put_at("x", 1, None, &[CacheLevel::Memory]);
    cache.put_at("y", 2, None, &[CacheLevel::Memory]);

    let stats = cache.stats();
    let memory = &stats.levels[&CacheLevel::Memory];
    assert_eq!(memory.entries, Some(2));
    assert_eq!(memory.estimated_size_bytes, 2 * AVERAGE_ENTRY_BYTES);
}

#[test]
fn test_health_needs_enough_lookups() {
    let cache = manager();
    for i in 0..10 {
        cache.get(format!("missing:{}", i));
    }
    let health = cache.health();
    assert!(health.healthy);
    assert_eq!(health.lookups, 10);

    for i in 0..100 {
        cache.get(format!("missing:{}", i));
    }
    assert!(!cache.health().healthy);
}

#[test]
fn test_configured_prefix() {
    let mut config = CacheConfig::default();
    config.key_prefix = "spam".into();
    let cache = CacheManager::in_memory(config).unwrap();

    cache.put("k", 1);
    // one entry per level
    assert_eq!(cache.invalidate_by_pattern("spam:default:*"), 3);
}

#[test]
fn test_concurrent_callers_keep_counters_and_toggles() {
    const READERS: usize = 4;
    const ROUNDS: usize = 200;

    let cache = manager();
    for i in 0..20 {
        cache.put(format!("hot:{}", i), i);
    }

    std::thread::scope(|scope| {
        for reader in 0..READERS {
            let cache = &cache;
            scope.spawn(move || {
                for i in 0..ROUNDS {
                    // half of the identifiers were never written
                    cache.get(format!("hot:{}", (i + reader) % 40));
                }
            });
        }
        scope.spawn(|| {
            for i in 0..ROUNDS {
                cache.put(format!("cold:{}", i), i);
                cache.forget(format!("cold:{}", i));
            }
        });
        scope.spawn(|| {
            for batch_size in 1..=ROUNDS {
                cache
                    .update_configuration(json!({"warming": {"batch_size": batch_size}}))
                    .unwrap();
            }
        });
        scope.spawn(|| {
            for i in 0..ROUNDS {
                cache.toggle_level(CacheLevel::Memory, i % 2 == 0);
            }
            cache.toggle_level(CacheLevel::Memory, false);
        });
    });

    let stats = cache.stats();
    assert_eq!(stats.hits + stats.misses, (READERS * ROUNDS) as u64);
    assert_eq!(stats.puts, (20 + ROUNDS) as u64);
    assert_eq!(stats.deletes, ROUNDS as u64);

    assert!(!cache.is_level_enabled(CacheLevel::Memory));
    let snapshot = cache.configuration().unwrap();
    assert_eq!(snapshot["levels"]["memory"]["enabled"], json!(false));
    assert_eq!(snapshot["warming"]["batch_size"], json!(ROUNDS));
}
