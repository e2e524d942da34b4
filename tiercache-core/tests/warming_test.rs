//! Batch warming with per-warmer failure isolation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tiercache_core::service::FixedProbe;
use tiercache_core::{CacheConfig, CacheLevel, CacheManager, WarmStatus, Warmer};

fn manager(config: CacheConfig) -> CacheManager {
    CacheManager::builder()
        .config(config)
        .in_memory_database()
        .memory_probe(Arc::new(FixedProbe::new(1 << 20)))
        .build()
        .unwrap()
}

#[test]
fn test_failures_are_isolated() {
    let cache = manager(CacheConfig::default());
    let warmers = vec![
        Warmer::with_value("geo:nl", json!("Netherlands")),
        Warmer::new("geo:xx", || Err(anyhow::anyhow!("importer offline"))),
        Warmer::with_value("geo:de", json!("Germany")),
        Warmer::new("geo:yy", || panic!("corrupt row")),
        Warmer::with_value("geo:fr", json!("France")),
    ];

    let report = cache.warm(warmers);

    assert_eq!(report.summary.total, 5);
    assert_eq!(report.summary.failed, 2);
    assert_eq!(report.summary.successful, 3);
    assert_eq!(report.errors.len(), 2);
    assert!(report.errors.iter().any(|e| e.contains("importer offline")));
    assert!(report.errors.iter().any(|e| e.contains("corrupt row")));

    for (key, country) in [("geo:nl", "Netherlands"), ("geo:de", "Germany"), ("geo:fr", "France")] {
        assert_eq!(cache.get(key), Some(json!(country)));
    }
    assert_eq!(cache.get("geo:xx"), None);
}

#[test]
fn test_skipped_warmers() {
    let cache = manager(CacheConfig::default());
    let report = cache.warm(vec![
        Warmer::new("empty", || Ok(None)),
        Warmer::new("null", || Ok(Some(json!(null)))),
        Warmer::with_value("value", json!(1)),
    ]);

    assert_eq!(report.summary.skipped, 2);
    assert_eq!(report.summary.successful, 1);
    assert_eq!(report.results[0].status, WarmStatus::Skipped);
}

#[test]
fn test_batches_follow_configured_size() {
    let mut config = CacheConfig::default();
    config.warming.batch_size = 2;
    let cache = manager(config);

    let warmers: Vec<Warmer> = (0..5)
        .map(|i| Warmer::with_value(format!("item:{}", i), json!(i)))
        .collect();
    let report = cache.warm(warmers);

    let sizes: Vec<usize> = report.batches.iter().map(|b| b.items).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert!(report.batches.iter().all(|b| !b.over_budget));
    assert_eq!(report.batches[0].memory_delta_bytes, 0);
}

#[test]
fn test_slow_batch_is_flagged_but_completes() {
    let mut config = CacheConfig::default();
    config.warming.batch_size = 1;
    config.warming.batch_time_budget_ms = 1;
    let cache = manager(config);

    let report = cache.warm(vec![
        Warmer::new("slow", || {
            std::thread::sleep(Duration::from_millis(20));
            Ok(Some(json!("late")))
        }),
        Warmer::with_value("fast", json!("early")),
    ]);

    assert_eq!(report.batches.len(), 2);
    assert!(report.batches[0].over_budget);
    assert_eq!(report.summary.successful, 2);
    assert_eq!(cache.get("slow"), Some(json!("late")));
}

#[test]
fn test_warm_at_selected_levels() {
    let cache = manager(CacheConfig::default());
    cache.warm_at(vec![Warmer::with_value("k", json!("v")).with_ttl(60)], &[CacheLevel::Database]);
    assert_eq!(cache.get_from_memory("k"), None);
    assert_eq!(cache.get_from_database("k"), Some(json!("v")));
}

#[test]
fn test_builtin_strategies_start_empty() {
    let cache = manager(CacheConfig::default());
    let names: Vec<String> = cache.strategies().into_iter().map(|s| s.name).collect();
    for expected in ["analytics_data", "configuration_data", "critical_data", "frequent_data", "security_data"] {
        assert!(names.contains(&expected.to_string()));
    }
    assert!(cache.strategies().iter().all(|s| s.warmers == 0));
}

#[test]
fn test_warm_cache_runs_strategies() {
    let cache = manager(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    assert!(cache.add_warmer(
        "security_data",
        Warmer::new("blocklist", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(json!(["203.0.113.0/24"])))
        }),
    ));
    assert!(!cache.add_warmer("missing", Warmer::with_value("k", json!(1))));
    cache.register_strategy(
        "custom",
        "Test strategy",
        vec![Warmer::new("broken", || Err(anyhow::anyhow!("boom")))],
    );

    let run = cache.warm_cache(Some(&["security_data", "custom", "nonexistent"]));
    assert_eq!(run.unknown, vec!["nonexistent".to_string()]);
    assert_eq!(run.strategies["security_data"].summary.successful, 1);
    assert_eq!(run.strategies["custom"].summary.failed, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get("blocklist"), Some(json!(["203.0.113.0/24"])));

    let stats = cache.warming_stats();
    assert_eq!(stats.total_warmed, 2);
    assert_eq!(stats.successful, 1);
    assert_eq!(stats.failed, 1);
    assert!(stats.last_run.is_some());

    let all = cache.warm_cache(None);
    assert!(all.unknown.is_empty());
    assert_eq!(all.strategies.len(), 6);
    assert_eq!(cache.warming_stats().total_warmed, 4);
}
