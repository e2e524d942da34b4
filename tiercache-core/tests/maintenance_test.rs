//! Database tier housekeeping

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use tiercache_core::service::FixedProbe;
use tiercache_core::{CacheConfig, CacheLevel, CacheManager, MaintenanceReport};
use tiercache_store::MemoryStore;

fn file_backed(dir: &TempDir) -> CacheManager {
    let mut config = CacheConfig::default();
    config.database.path = Some(dir.path().join("cache.db"));
    CacheManager::builder()
        .config(config)
        .memory_probe(Arc::new(FixedProbe::default()))
        .build()
        .unwrap()
}

#[test]
fn test_default_run_is_compact() {
    let dir = TempDir::new().unwrap();
    let cache = file_backed(&dir);
    cache.put("k", 1);

    match cache.maintain_database_cache(&[]) {
        MaintenanceReport::Compact(report) => {
            assert_eq!(report.operations.len(), 2);
            assert!(report.operations["cleanup"]);
            assert!(report.operations["optimize"]);
        }
        other => panic!("expected compact report, got {:?}", other),
    }
    assert!(dir.path().join("cache.db").exists());
}

#[test]
fn test_extended_operations_are_detailed() {
    let dir = TempDir::new().unwrap();
    let cache = file_backed(&dir);
    cache.put_at("expiring", "x", Some(1), &[CacheLevel::Database]);
    cache.put("kept", json!({"a": 1}));

    let report = cache.maintain_database_cache(&[
        "cleanup_expired",
        "analyze_usage",
        "vacuum_space",
        "update_indexes",
        "validate_integrity",
    ]);

    match report {
        MaintenanceReport::Detailed(report) => {
            assert_eq!(report.summary.total, 5);
            assert_eq!(report.summary.failed, 0);
            assert_eq!(report.summary.success_rate, 100.0);
            assert_eq!(report.operations[0].operation, "cleanup_expired");
            let before = report.statistics.before.expect("snapshot before");
            let after = report.statistics.after.expect("snapshot after");
            assert!(before.total_entries >= after.total_entries);
        }
        other => panic!("expected detailed report, got {:?}", other),
    }
}

#[test]
fn test_unknown_operation_fails_alone() {
    let cache = CacheManager::in_memory(CacheConfig::default()).unwrap();
    let report = cache.maintain_database_cache(&["cleanup", "defragment", "optimize_tables"]);

    match report {
        MaintenanceReport::Detailed(report) => {
            assert_eq!(report.summary.successful, 2);
            assert_eq!(report.summary.failed, 1);
            assert!(!report.operations[1].success);
            assert!(report.recommendations.iter().any(|r| r.contains("defragment")));
        }
        other => panic!("expected detailed report, got {:?}", other),
    }
}

#[test]
fn test_without_maintenance_support_every_operation_fails() {
    let cache = CacheManager::builder()
        .store(CacheLevel::Database, Arc::new(MemoryStore::new()))
        .build()
        .unwrap();

    let report = cache.maintain_database_cache(&[]);
    assert!(!report.all_succeeded());
    match report {
        MaintenanceReport::Compact(report) => assert!(report.operations.values().all(|ok| !ok)),
        other => panic!("expected compact report, got {:?}", other),
    }
}
