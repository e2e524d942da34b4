//! Tag, pattern, namespace and dependency invalidation

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tiercache_core::service::FixedProbe;
use tiercache_core::{CacheKey, CacheLevel, CacheManager, InvalidationEvent, InvalidationKind, InvalidationListener};

fn manager() -> CacheManager {
    CacheManager::builder()
        .in_memory_database()
        .memory_probe(Arc::new(FixedProbe::new(1 << 20)))
        .build()
        .unwrap()
}

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<InvalidationEvent>>,
}

impl InvalidationListener for RecordingListener {
    fn on_invalidation(&self, event: &InvalidationEvent) {
        self.events.lock().push(event.clone());
    }
}

#[test]
fn test_invalidate_by_tags_removes_only_tagged_keys() {
    let cache = manager();
    for ip in ["192.0.2.1", "192.0.2.2"] {
        assert!(cache
            .context()
            .tags(["T"])
            .levels(&[CacheLevel::Memory])
            .put(format!("ip:{}", ip), json!({"score": 80})));
    }
    cache.put_at("ip:192.0.2.3", json!({"score": 10}), None, &[CacheLevel::Memory]);

    assert!(cache.invalidate_by_tags(["T"]));

    assert_eq!(cache.get_from_memory("ip:192.0.2.1"), None);
    assert_eq!(cache.get_from_memory("ip:192.0.2.2"), None);
    assert_eq!(cache.get_from_memory("ip:192.0.2.3"), Some(json!({"score": 10})));
}

#[test]
fn test_tag_invalidation_reaches_every_level() {
    let cache = manager();
    assert!(cache.context().tags(["T"]).put("ip:1", 80));
    cache.put("ip:2", 10);

    assert!(cache.invalidate_by_tags(["T"]));

    assert_eq!(cache.get_from_request("ip:1"), None);
    assert_eq!(cache.get_from_memory("ip:1"), None);
    assert_eq!(cache.get_from_database("ip:1"), None);
    assert_eq!(cache.get("ip:1"), None);
    assert_eq!(cache.get("ip:2"), Some(json!(10)));
}

#[test]
fn test_backfilled_copies_keep_their_tags() {
    let cache = manager();
    cache
        .context()
        .tags(["geo"])
        .levels(&[CacheLevel::Database])
        .put("geo:de", "Germany");

    // plain read copies the entry into the faster levels
    assert_eq!(cache.get("geo:de"), Some(json!("Germany")));
    assert_eq!(cache.get_from_memory("geo:de"), Some(json!("Germany")));

    assert!(cache.invalidate_by_tags(["geo"]));
    assert_eq!(cache.get("geo:de"), None);
}

#[test]
fn test_invalidate_by_pattern_removes_matching_keys() {
    let cache = manager();
    cache.put("user:123:profile", json!({"name": "a"}));
    cache.put("user:123:score", 4);
    cache.put("user:1234:profile", json!({"name": "b"}));
    cache.put("user:456:profile", json!({"name": "c"}));

    let removed = cache.invalidate_by_pattern("*user:123:*");
    // two keys at each of the three levels
    assert_eq!(removed, 6);

    assert_eq!(cache.get("user:123:profile"), None);
    assert_eq!(cache.get("user:123:score"), None);
    assert!(cache.get("user:1234:profile").is_some());
    assert!(cache.get("user:456:profile").is_some());
}

#[test]
fn test_invalidate_by_namespace() {
    let cache = manager();
    cache.put(CacheKey::new("nl").with_namespace("geo"), "Netherlands");
    cache.put(CacheKey::new("be").with_namespace("geo"), "Belgium");
    cache.put(CacheKey::new("nl").with_namespace("scores"), 3);

    assert_eq!(cache.invalidate_by_namespace("geo"), 6);
    assert_eq!(cache.get(CacheKey::new("nl").with_namespace("geo")), None);
    assert_eq!(cache.get(CacheKey::new("nl").with_namespace("scores")), Some(json!(3)));
}

#[test]
fn test_dependency_cascade_is_one_hop() {
    let cache = manager();
    cache.add_dependency("reputation", "scores");
    cache.add_dependency("scores", "reports");
    // a cycle must not loop
    cache.add_dependency("scores", "reputation");

    let ip = CacheKey::new("ip:198.51.100.9").with_namespace("reputation");
    cache.put(ip.clone(), 55);
    cache.put(CacheKey::new("ip:198.51.100.9").with_namespace("scores"), 0.8);
    cache.put(CacheKey::new("daily").with_namespace("reports"), json!([1, 2]));

    assert!(cache.invalidate(ip.clone()));

    assert_eq!(cache.get(ip), None);
    assert_eq!(cache.get(CacheKey::new("ip:198.51.100.9").with_namespace("scores")), None);
    // reports depends on scores, which is two hops away
    assert_eq!(cache.get(CacheKey::new("daily").with_namespace("reports")), Some(json!([1, 2])));

    let stats = cache.stats();
    assert_eq!(stats.invalidations, 1);
    assert_eq!(stats.cascade_invalidations, 1);
}

#[test]
fn test_namespace_invalidation_cascades() {
    let cache = manager();
    cache.add_dependency("geo", "geo-derived");
    cache.put(CacheKey::new("nl").with_namespace("geo"), "NL");
    cache.put(CacheKey::new("nl").with_namespace("geo-derived"), "EU");

    cache.invalidate_by_namespace("geo");
    assert_eq!(cache.get(CacheKey::new("nl").with_namespace("geo-derived")), None);
    assert_eq!(cache.stats().cascade_invalidations, 1);
}

#[test]
fn test_dependencies_copy() {
    let cache = manager();
    cache.add_dependency("a", "b");
    cache.add_dependency("a", "b");
    cache.add_dependency("a", "c");

    let mut snapshot = cache.dependencies();
    assert_eq!(snapshot["a"].len(), 2);
    snapshot.clear();
    assert_eq!(cache.dependencies().len(), 1);

    assert!(cache.remove_dependency("a", "b"));
    assert!(!cache.remove_dependency("a", "b"));
    assert_eq!(cache.dependencies()["a"].len(), 1);
}

#[test]
fn test_one_notification_per_call() {
    let cache = manager();
    let listener = Arc::new(RecordingListener::default());
    cache.add_invalidation_listener(listener.clone());
    cache.add_dependency("default", "related");

    cache.put("k", 1);
    cache.invalidate("k");
    cache.invalidate_by_pattern("*nothing*");
    cache.invalidate_by_tags(["t"]);

    let events = listener.events.lock();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].kind, InvalidationKind::Key);
    assert!(events[0].success);
    assert_eq!(events[0].cascades, 1);
    assert_eq!(events[1].kind, InvalidationKind::Pattern);
    assert_eq!(events[1].removed, 0);
    assert_eq!(events[2].kind, InvalidationKind::Tags);
}

#[test]
fn test_invalidate_missing_key_does_not_cascade() {
    let cache = manager();
    cache.add_dependency("default", "other");
    cache.put(CacheKey::new("k").with_namespace("other"), 1);

    assert!(!cache.invalidate("absent"));
    assert_eq!(cache.get(CacheKey::new("k").with_namespace("other")), Some(json!(1)));
    assert_eq!(cache.stats().cascade_invalidations, 0);
}

#[test]
fn test_fluent_invalidate_respects_levels() {
    let cache = manager();
    cache.put("k", 1);
    assert!(cache.context().levels(&[CacheLevel::Memory]).invalidate("k"));
    assert_eq!(cache.get_from_memory("k"), None);
    assert_eq!(cache.get_from_database("k"), Some(json!(1)));
}
