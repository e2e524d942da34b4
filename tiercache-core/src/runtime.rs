//! # Cache Runtime
//!
//! Shared state owned by a [`CacheManager`](crate::manager::CacheManager)
//! and handed to every service: the registered level stores, level toggles,
//! the active configuration, statistics counters and the dependency graph.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tiercache_store::LevelStore;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::key::{CacheKey, DEFAULT_PREFIX};
use crate::level::{CacheLevel, LevelSpec};
use crate::service::statistics::MemoryProbe;

fn slot(level: CacheLevel) -> usize {
    level.priority() as usize - 1
}

/// Running mean of latency samples
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningMean {
    total_ms: f64,
    count: u64,
}

impl RunningMean {
    fn record(&mut self, ms: f64) {
        self.total_ms += ms;
        self.count += 1;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

#[derive(Debug, Default)]
struct LatencySamples {
    overall: RunningMean,
    per_level: [RunningMean; 3],
}

#[derive(Debug)]
struct MemorySamples {
    window: VecDeque<u64>,
    capacity: usize,
    current: u64,
    peak: u64,
}

impl MemorySamples {
    fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            current: 0,
            peak: 0,
        }
    }

    fn resize(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.window.len() > capacity.max(1) {
            self.window.pop_front();
        }
    }

    fn record(&mut self, bytes: u64) {
        while self.window.len() >= self.capacity.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(bytes);
        self.current = bytes;
        self.peak = self.peak.max(bytes);
    }

    fn clear(&mut self) {
        self.window.clear();
        self.current = 0;
        self.peak = 0;
    }
}

/// Point-in-time copy of [`StatisticsCounters`]
#[derive(Debug, Clone, Default)]
pub struct CounterSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub deletes: u64,
    pub invalidations: u64,
    pub cascade_invalidations: u64,
    pub level_hits: BTreeMap<CacheLevel, u64>,
    pub latency: RunningMean,
    pub level_latency: BTreeMap<CacheLevel, RunningMean>,
    pub memory_current: u64,
    pub memory_peak: u64,
    pub memory_window: Vec<u64>,
}

/// Process-lifetime counters, reset only by `reset_stats`
#[derive(Debug)]
pub struct StatisticsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
    invalidations: AtomicU64,
    cascade_invalidations: AtomicU64,
    level_hits: [AtomicU64; 3],
    latency: Mutex<LatencySamples>,
    memory: Mutex<MemorySamples>,
}

impl StatisticsCounters {
    pub fn new(memory_window: usize) -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            cascade_invalidations: AtomicU64::new(0),
            level_hits: Default::default(),
            latency: Mutex::new(LatencySamples::default()),
            memory: Mutex::new(MemorySamples::new(memory_window)),
        }
    }

    pub fn record_hit(&self, level: CacheLevel, elapsed: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.level_hits[slot(level)].fetch_add(1, Ordering::Relaxed);

        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut latency = self.latency.lock();
        latency.overall.record(ms);
        latency.per_level[slot(level)].record(ms);
    }

    pub fn record_miss(&self, elapsed: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.latency.lock().overall.record(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cascade(&self) {
        self.cascade_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory(&self, bytes: u64) {
        self.memory.lock().record(bytes);
    }

    /// Change how many memory samples are kept, dropping the oldest
    pub fn resize_memory_window(&self, capacity: usize) {
        self.memory.lock().resize(capacity);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let latency = self.latency.lock();
        let memory = self.memory.lock();

        CounterSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            cascade_invalidations: self.cascade_invalidations.load(Ordering::Relaxed),
            level_hits: CacheLevel::ALL
                .iter()
                .map(|&level| (level, self.level_hits[slot(level)].load(Ordering::Relaxed)))
                .collect(),
            latency: latency.overall,
            level_latency: CacheLevel::ALL
                .iter()
                .map(|&level| (level, latency.per_level[slot(level)]))
                .collect(),
            memory_current: memory.current,
            memory_peak: memory.peak,
            memory_window: memory.window.iter().copied().collect(),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.puts,
            &self.deletes,
            &self.invalidations,
            &self.cascade_invalidations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        for counter in &self.level_hits {
            counter.store(0, Ordering::Relaxed);
        }
        *self.latency.lock() = LatencySamples::default();
        self.memory.lock().clear();
    }
}

/// Source identifier -> dependent identifiers
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: DashMap<String, HashSet<String>>,
}

impl DependencyGraph {
    pub fn add(&self, source: &str, dependent: &str) {
        self.edges
            .entry(source.to_string())
            .or_default()
            .insert(dependent.to_string());
    }

    /// Returns whether the edge existed
    pub fn remove(&self, source: &str, dependent: &str) -> bool {
        let removed = self
            .edges
            .get_mut(source)
            .map_or(false, |mut dependents| dependents.remove(dependent));
        self.edges.remove_if(source, |_, dependents| dependents.is_empty());
        removed
    }

    /// Direct dependents of `source`, sorted
    pub fn dependents(&self, source: &str) -> Vec<String> {
        let mut dependents: Vec<String> = self
            .edges
            .get(source)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default();
        dependents.sort();
        dependents
    }

    pub fn snapshot(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.edges
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().iter().cloned().collect()))
            .collect()
    }
}

/// Runtime state shared by the services
pub struct CacheRuntime {
    stores: BTreeMap<CacheLevel, Arc<dyn LevelStore>>,
    enabled: [AtomicBool; 3],
    config: RwLock<CacheConfig>,
    probe: Arc<dyn MemoryProbe>,
    pub stats: StatisticsCounters,
    pub dependencies: DependencyGraph,
}

impl CacheRuntime {
    pub fn new(
        config: CacheConfig,
        stores: BTreeMap<CacheLevel, Arc<dyn LevelStore>>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        let runtime = Self {
            stores,
            enabled: Default::default(),
            stats: StatisticsCounters::new(config.statistics.memory_window),
            config: RwLock::new(config),
            probe,
            dependencies: DependencyGraph::default(),
        };
        runtime.sync_toggles(&runtime.config.read());
        runtime
    }

    fn sync_toggles(&self, config: &CacheConfig) {
        for level in CacheLevel::ALL {
            self.enabled[slot(level)].store(config.levels.get(level).enabled, Ordering::SeqCst);
        }
    }

    pub fn store(&self, level: CacheLevel) -> Option<&Arc<dyn LevelStore>> {
        self.stores.get(&level)
    }

    pub fn is_enabled(&self, level: CacheLevel) -> bool {
        self.enabled[slot(level)].load(Ordering::SeqCst)
    }

    /// Flip a level on or off; the configuration snapshot follows
    pub fn set_enabled(&self, level: CacheLevel, enabled: bool) {
        let mut config = self.config.write();
        config.levels.get_mut(level).enabled = enabled;
        self.enabled[slot(level)].store(enabled, Ordering::SeqCst);
    }

    /// Levels that are registered and enabled, fastest first.
    ///
    /// `requested` narrows the set; duplicates collapse.
    pub fn candidate_levels(&self, requested: Option<&[CacheLevel]>) -> Vec<CacheLevel> {
        let wanted: BTreeSet<CacheLevel> = match requested {
            Some(levels) => levels.iter().copied().collect(),
            None => CacheLevel::ALL.into_iter().collect(),
        };
        wanted
            .into_iter()
            .filter(|level| self.stores.contains_key(level) && self.is_enabled(*level))
            .collect()
    }

    /// Registered levels regardless of their toggle, fastest first
    pub fn registered_levels(&self) -> Vec<CacheLevel> {
        self.stores.keys().copied().collect()
    }

    /// Effective metadata for `level` under the active configuration
    pub fn spec(&self, level: CacheLevel) -> LevelSpec {
        self.config.read().levels.get(level).spec(level)
    }

    pub fn config(&self) -> CacheConfig {
        self.config.read().clone()
    }

    /// Replace the configuration with the result of `update`.
    ///
    /// The write lock is held from reading the current value until the
    /// toggles are synced, so a concurrent [`set_enabled`](Self::set_enabled)
    /// is either seen by `update` or applied after it. An error leaves the
    /// active configuration untouched.
    pub fn update_config<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&CacheConfig) -> Result<CacheConfig>,
    {
        let mut config = self.config.write();
        let updated = update(&config)?;
        self.stats.resize_memory_window(updated.statistics.memory_window);
        self.sync_toggles(&updated);
        *config = updated;
        Ok(())
    }

    pub fn key_prefix(&self) -> String {
        self.config.read().key_prefix.clone()
    }

    /// Keys still carrying the built-in prefix adopt the configured prefix
    pub fn resolve_key(&self, key: CacheKey) -> CacheKey {
        let prefix = self.key_prefix();
        if key.prefix() == DEFAULT_PREFIX && prefix != DEFAULT_PREFIX {
            key.with_prefix(prefix)
        } else {
            key
        }
    }

    pub fn current_memory(&self) -> Option<u64> {
        self.probe.current_bytes()
    }

    /// Record one memory sample when tracking is enabled
    pub fn sample_memory(&self) {
        if !self.config.read().statistics.track_memory {
            return;
        }
        if let Some(bytes) = self.probe.current_bytes() {
            self.stats.record_memory(bytes);
        }
    }
}
