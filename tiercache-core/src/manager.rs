//! # Cache Manager
//!
//! Facade over the cache services. Every entry point accepts anything
//! convertible into a [`CacheKey`]; plain strings address the default
//! namespace under the configured prefix.
//!
//! ```rust
//! use serde_json::json;
//! use tiercache_core::{CacheConfig, CacheLevel, CacheManager};
//!
//! let cache = CacheManager::in_memory(CacheConfig::default()).unwrap();
//! assert!(cache.put_at("score:42", json!(0.93), Some(3600), &[CacheLevel::Memory, CacheLevel::Database]));
//!
//! assert_eq!(cache.get_from_request("score:42"), None);
//! assert_eq!(cache.get_from_memory("score:42"), Some(json!(0.93)));
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tiercache_store::{LevelStore, MemoryStore, RequestStore, SqliteStore};
use tracing::info;

use crate::config::{CacheConfig, ValidateConfig};
use crate::context::CacheContext;
use crate::error::Result;
use crate::key::{CacheKey, ValidationReport};
use crate::level::{CacheLevel, TtlRequest};
use crate::runtime::CacheRuntime;
use crate::service::{
    CacheHealth, CacheInvalidationService, CacheMaintenanceService, CacheOperationService,
    CacheStatisticsService, CacheStats, CacheWarmingService, InvalidationListener, MaintenanceReport,
    MemoryProbe, PutManyReport, StrategyInfo, StrategyRunReport, SysinfoProbe, Warmer, WarmingReport,
    WarmingRunStats,
};

/// Builder for [`CacheManager`]
#[derive(Default)]
pub struct CacheManagerBuilder {
    config: Option<CacheConfig>,
    stores: BTreeMap<CacheLevel, Arc<dyn LevelStore>>,
    probe: Option<Arc<dyn MemoryProbe>>,
    in_memory_database: bool,
}

impl CacheManagerBuilder {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use `store` for `level` instead of the built-in adapter
    pub fn store(mut self, level: CacheLevel, store: Arc<dyn LevelStore>) -> Self {
        self.stores.insert(level, store);
        self
    }

    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Keep the database tier in memory even when a path is configured
    pub fn in_memory_database(mut self) -> Self {
        self.in_memory_database = true;
        self
    }

    /// Validate the configuration and fill unset levels with built-in adapters
    pub fn build(self) -> Result<CacheManager> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let mut stores = self.stores;
        if !stores.contains_key(&CacheLevel::Request) {
            stores.insert(CacheLevel::Request, Arc::new(RequestStore::new()));
        }
        if !stores.contains_key(&CacheLevel::Memory) {
            stores.insert(
                CacheLevel::Memory,
                Arc::new(MemoryStore::with_capacity(config.memory.max_entries)),
            );
        }
        if !stores.contains_key(&CacheLevel::Database) {
            let store = match (&config.database.path, self.in_memory_database) {
                (Some(path), false) => SqliteStore::open(path)?,
                _ => SqliteStore::open_in_memory()?,
            };
            stores.insert(CacheLevel::Database, Arc::new(store));
        }

        let probe = self.probe.unwrap_or_else(|| Arc::new(SysinfoProbe::new()));
        Ok(CacheManager::from_runtime(Arc::new(CacheRuntime::new(config, stores, probe))))
    }
}

/// Multi-tier cache facade
pub struct CacheManager {
    runtime: Arc<CacheRuntime>,
    operations: Arc<CacheOperationService>,
    invalidation: CacheInvalidationService,
    warming: CacheWarmingService,
    statistics: CacheStatisticsService,
    maintenance: CacheMaintenanceService,
}

impl CacheManager {
    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::default()
    }

    /// Manager with built-in adapters and an in-memory database tier
    pub fn in_memory(config: CacheConfig) -> Result<Self> {
        Self::builder().config(config).in_memory_database().build()
    }

    fn from_runtime(runtime: Arc<CacheRuntime>) -> Self {
        let operations = Arc::new(CacheOperationService::new(Arc::clone(&runtime)));
        Self {
            invalidation: CacheInvalidationService::new(Arc::clone(&runtime), Arc::clone(&operations)),
            warming: CacheWarmingService::new(Arc::clone(&runtime), Arc::clone(&operations)),
            statistics: CacheStatisticsService::new(Arc::clone(&runtime)),
            maintenance: CacheMaintenanceService::new(Arc::clone(&runtime)),
            operations,
            runtime,
        }
    }

    pub(crate) fn key(&self, key: impl Into<CacheKey>) -> CacheKey {
        self.runtime.resolve_key(key.into())
    }

    // Level control

    pub fn toggle_level(&self, level: CacheLevel, enabled: bool) {
        self.runtime.set_enabled(level, enabled);
        info!("Cache level {} {}", level, if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_level_enabled(&self, level: CacheLevel) -> bool {
        self.runtime.is_enabled(level)
    }

    /// Drop everything held by the request level
    pub fn end_request_scope(&self) -> bool {
        self.operations.flush(Some(&[CacheLevel::Request]))
    }

    // Reads

    pub fn get(&self, key: impl Into<CacheKey>) -> Option<Value> {
        self.operations.get(&self.key(key), None)
    }

    pub fn get_or(&self, key: impl Into<CacheKey>, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    pub fn get_at(&self, key: impl Into<CacheKey>, levels: &[CacheLevel]) -> Option<Value> {
        self.operations.get(&self.key(key), Some(levels))
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: impl Into<CacheKey>) -> Option<T> {
        self.operations.get_as(&self.key(key), None)
    }

    pub fn get_from_request(&self, key: impl Into<CacheKey>) -> Option<Value> {
        self.get_at(key, &[CacheLevel::Request])
    }

    pub fn get_from_memory(&self, key: impl Into<CacheKey>) -> Option<Value> {
        self.get_at(key, &[CacheLevel::Memory])
    }

    pub fn get_from_database(&self, key: impl Into<CacheKey>) -> Option<Value> {
        self.get_at(key, &[CacheLevel::Database])
    }

    pub fn has(&self, key: impl Into<CacheKey>) -> bool {
        self.operations.has(&self.key(key), None)
    }

    /// Values found for `keys`, keyed by the plain key string; misses are omitted.
    /// A plain key shared by two namespaces in one batch is reported under each
    /// canonical identifier.
    pub fn many<I, K>(&self, keys: I) -> HashMap<String, Value>
    where
        I: IntoIterator<Item = K>,
        K: Into<CacheKey>,
    {
        let keys: Vec<CacheKey> = keys.into_iter().map(|key| self.key(key)).collect();
        self.operations.many(&keys, None)
    }

    // Writes

    /// Write to every enabled level with each level's default TTL
    pub fn put(&self, key: impl Into<CacheKey>, value: impl Into<Value>) -> bool {
        self.operations.put(&self.key(key), &value.into(), TtlRequest::Default, None)
    }

    pub fn put_with_ttl(&self, key: impl Into<CacheKey>, value: impl Into<Value>, ttl: i64) -> bool {
        self.operations.put(&self.key(key), &value.into(), TtlRequest::Seconds(ttl), None)
    }

    pub fn put_at(
        &self,
        key: impl Into<CacheKey>,
        value: impl Into<Value>,
        ttl: Option<i64>,
        levels: &[CacheLevel],
    ) -> bool {
        self.operations.put(&self.key(key), &value.into(), TtlRequest::from(ttl), Some(levels))
    }

    pub fn put_many<K, T>(&self, items: Vec<(K, T)>, ttl: Option<i64>) -> PutManyReport
    where
        K: Into<CacheKey>,
        T: Serialize,
    {
        let items: Vec<(CacheKey, T)> = items.into_iter().map(|(key, item)| (self.key(key), item)).collect();
        self.operations.put_many(&items, TtlRequest::from(ttl), None)
    }

    /// Write only when the fastest enabled level has no entry
    pub fn add(&self, key: impl Into<CacheKey>, value: impl Into<Value>, ttl: Option<i64>) -> bool {
        self.operations.add(&self.key(key), &value.into(), TtlRequest::from(ttl))
    }

    pub fn remember<F>(&self, key: impl Into<CacheKey>, ttl: Option<i64>, producer: F) -> Value
    where
        F: FnOnce() -> Value,
    {
        self.operations.remember(&self.key(key), TtlRequest::from(ttl), producer)
    }

    pub fn try_remember<F>(&self, key: impl Into<CacheKey>, ttl: Option<i64>, producer: F) -> anyhow::Result<Value>
    where
        F: FnOnce() -> anyhow::Result<Value>,
    {
        self.operations.try_remember(&self.key(key), TtlRequest::from(ttl), producer)
    }

    /// [`remember`](Self::remember) with each level's maximum TTL
    pub fn remember_forever<F>(&self, key: impl Into<CacheKey>, producer: F) -> Value
    where
        F: FnOnce() -> Value,
    {
        self.operations.remember(&self.key(key), TtlRequest::Maximum, producer)
    }

    pub fn forget(&self, key: impl Into<CacheKey>) -> bool {
        self.operations.forget(&self.key(key), None)
    }

    pub fn forget_at(&self, key: impl Into<CacheKey>, levels: &[CacheLevel]) -> bool {
        self.operations.forget(&self.key(key), Some(levels))
    }

    pub fn flush(&self, levels: &[CacheLevel]) -> bool {
        self.operations.flush(Some(levels))
    }

    /// Flush every registered level, enabled or not
    pub fn clear(&self) -> bool {
        let levels = self.runtime.registered_levels();
        let mut ok = true;
        for level in levels {
            if let Some(store) = self.runtime.store(level) {
                if let Err(e) = store.flush() {
                    tracing::warn!("Cache clear failed at {}: {}", level, e);
                    ok = false;
                }
            }
        }
        ok
    }

    pub fn increment(&self, key: impl Into<CacheKey>, by: i64) -> Result<i64> {
        self.operations.increment(&self.key(key), by, None)
    }

    pub fn decrement(&self, key: impl Into<CacheKey>, by: i64) -> Result<i64> {
        self.operations.decrement(&self.key(key), by, None)
    }

    // Invalidation

    pub fn invalidate(&self, key: impl Into<CacheKey>) -> bool {
        self.invalidation.invalidate(&self.key(key), None)
    }

    pub fn invalidate_by_tags<I, S>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        self.invalidation.invalidate_by_tags(&tags, None)
    }

    /// Remove entries whose canonical identifier matches `glob`
    pub fn invalidate_by_pattern(&self, glob: &str) -> usize {
        self.invalidation.invalidate_by_pattern(glob, None)
    }

    pub fn invalidate_by_namespace(&self, namespace: &str) -> usize {
        self.invalidation.invalidate_by_namespace(namespace, None)
    }

    /// Invalidating `source` also removes identifiers mentioning `dependent`
    pub fn add_dependency(&self, source: &str, dependent: &str) {
        self.invalidation.add_dependency(source, dependent);
    }

    pub fn remove_dependency(&self, source: &str, dependent: &str) -> bool {
        self.invalidation.remove_dependency(source, dependent)
    }

    pub fn dependencies(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.runtime.dependencies.snapshot()
    }

    pub fn add_invalidation_listener(&self, listener: Arc<dyn InvalidationListener>) {
        self.invalidation.add_listener(listener);
    }

    // Warming

    pub fn warm(&self, warmers: Vec<Warmer>) -> WarmingReport {
        let warmers: Vec<Warmer> = warmers.into_iter().map(|w| w.resolve_key(&self.runtime)).collect();
        self.warming.warm(&warmers, None)
    }

    pub fn warm_at(&self, warmers: Vec<Warmer>, levels: &[CacheLevel]) -> WarmingReport {
        let warmers: Vec<Warmer> = warmers.into_iter().map(|w| w.resolve_key(&self.runtime)).collect();
        self.warming.warm(&warmers, Some(levels))
    }

    /// Run the named strategies, or every registered one with `None`
    pub fn warm_cache(&self, strategies: Option<&[&str]>) -> StrategyRunReport {
        self.warming.warm_cache(strategies)
    }

    pub fn register_strategy(&self, name: &str, description: &str, warmers: Vec<Warmer>) {
        let warmers = warmers.into_iter().map(|w| w.resolve_key(&self.runtime)).collect();
        self.warming.register_strategy(name, description, warmers);
    }

    pub fn add_warmer(&self, strategy: &str, warmer: Warmer) -> bool {
        self.warming.add_warmer(strategy, warmer.resolve_key(&self.runtime))
    }

    pub fn strategies(&self) -> Vec<StrategyInfo> {
        self.warming.strategies()
    }

    pub fn warming_stats(&self) -> WarmingRunStats {
        self.warming.warming_stats()
    }

    // Maintenance and statistics

    /// Housekeeping of the database tier; an empty list runs `cleanup` + `optimize`
    pub fn maintain_database_cache(&self, operations: &[&str]) -> MaintenanceReport {
        self.maintenance.maintain(operations)
    }

    pub fn stats(&self) -> CacheStats {
        self.statistics.stats()
    }

    pub fn health(&self) -> CacheHealth {
        self.statistics.health()
    }

    pub fn reset_stats(&self) {
        self.statistics.reset();
    }

    // Configuration

    /// JSON snapshot of the active configuration
    pub fn configuration(&self) -> Result<Value> {
        self.runtime.config().to_value()
    }

    /// Deep-merge `patch` into the active configuration.
    ///
    /// A rejected patch leaves the active configuration untouched.
    pub fn update_configuration(&self, patch: Value) -> Result<()> {
        self.runtime.update_config(|current| current.merged(patch))?;
        info!("Cache configuration updated");
        Ok(())
    }

    /// One-shot context for the next operation
    pub fn context(&self) -> CacheContext<'_> {
        CacheContext::new(self)
    }

    pub fn validate_key(&self, key: impl Into<CacheKey>) -> ValidationReport {
        key.into().validate()
    }

    pub(crate) fn operations(&self) -> &CacheOperationService {
        &self.operations
    }

    pub(crate) fn invalidation(&self) -> &CacheInvalidationService {
        &self.invalidation
    }
}
