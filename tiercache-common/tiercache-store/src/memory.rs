//! # Memory Store
//!
//! Bounded in-process tier with TTL and tag support.
//!
//! ## Features
//!
//! - LRU eviction once `max_entries` is reached
//! - Per-entry TTL, expired entries are dropped lazily on access
//! - Tag index for `forget_tagged`
//! - Eviction / expiration counters

use std::collections::{BTreeSet, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::store::{estimated_size, numeric_value, LevelStore, StoreFootprint};

/// Default capacity of the memory tier
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Eviction and expiration counters
#[derive(Debug, Default)]
pub struct MemoryStoreMetrics {
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl MemoryStoreMetrics {
    fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Value,
    expires_at: Option<Instant>,
    tags: BTreeSet<String>,
    bytes: u64,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

struct MemoryState {
    entries: LruCache<String, MemoryEntry>,
    /// tag -> keys carrying it
    tag_index: HashMap<String, HashSet<String>>,
}

impl MemoryState {
    fn unlink_tags(&mut self, key: &str, tags: &BTreeSet<String>) {
        for tag in tags {
            if let Some(keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<MemoryEntry> {
        let entry = self.entries.pop(key)?;
        self.unlink_tags(key, &entry.tags);
        Some(entry)
    }

    /// Fetch a live entry, dropping it first if it has expired
    fn live(&mut self, key: &str, metrics: &MemoryStoreMetrics) -> Option<&MemoryEntry> {
        let expired = self.entries.peek(key)?.is_expired(Instant::now());
        if expired {
            self.remove(key);
            metrics.record_expiration();
            return None;
        }
        self.entries.get(key)
    }

    fn insert(&mut self, key: String, entry: MemoryEntry, metrics: &MemoryStoreMetrics) {
        if let Some(previous) = self.entries.peek(&key) {
            let previous_tags = previous.tags.clone();
            self.unlink_tags(&key, &previous_tags);
        }
        for tag in &entry.tags {
            self.tag_index.entry(tag.clone()).or_default().insert(key.clone());
        }
        if let Some((evicted_key, evicted)) = self.entries.push(key.clone(), entry) {
            if evicted_key != key {
                tracing::debug!("Memory tier evicted: {}", evicted_key);
                self.unlink_tags(&evicted_key, &evicted.tags);
                metrics.record_eviction();
            }
        }
    }
}

/// LRU-bounded memory tier
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    metrics: MemoryStoreMetrics,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    /// A zero capacity falls back to [`DEFAULT_MAX_ENTRIES`]
    pub fn with_capacity(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries)
            .or_else(|| NonZeroUsize::new(DEFAULT_MAX_ENTRIES))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(MemoryState {
                entries: LruCache::new(capacity),
                tag_index: HashMap::new(),
            }),
            metrics: MemoryStoreMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &MemoryStoreMetrics {
        &self.metrics
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returning how many were removed
    pub fn remove_expired_entries(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
            self.metrics.record_expiration();
        }
        expired.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut state = self.state.lock();
        Ok(state.live(key, &self.metrics).map(|entry| entry.value.clone()))
    }

    fn get_tagged(&self, key: &str) -> Result<Option<(Value, BTreeSet<String>)>> {
        let mut state = self.state.lock();
        Ok(state
            .live(key, &self.metrics)
            .map(|entry| (entry.value.clone(), entry.tags.clone())))
    }

    fn put(&self, key: &str, value: &Value, ttl: Option<Duration>, tags: &BTreeSet<String>) -> Result<()> {
        let entry = MemoryEntry {
            value: value.clone(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
            tags: tags.clone(),
            bytes: estimated_size(key, value),
        };
        self.state.lock().insert(key.to_string(), entry, &self.metrics);
        Ok(())
    }

    fn forget(&self, key: &str) -> Result<bool> {
        Ok(self.state.lock().remove(key).is_some())
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.entries.clear();
        state.tag_index.clear();
        Ok(())
    }

    fn increment(&self, key: &str, by: i64) -> Result<i64> {
        let mut state = self.state.lock();
        let (current, expires_at, tags) = match state.live(key, &self.metrics) {
            Some(entry) => (
                numeric_value(&entry.value).ok_or_else(|| StoreError::NotNumeric(key.to_string()))?,
                entry.expires_at,
                entry.tags.clone(),
            ),
            None => (0, None, BTreeSet::new()),
        };
        let next = current.saturating_add(by);
        let value = Value::from(next);
        let entry = MemoryEntry {
            bytes: estimated_size(key, &value),
            value,
            expires_at,
            tags,
        };
        state.insert(key.to_string(), entry, &self.metrics);
        Ok(next)
    }

    fn forget_tagged(&self, tags: &[String]) -> Result<usize> {
        let mut state = self.state.lock();
        let keys: HashSet<String> = tags
            .iter()
            .filter_map(|tag| state.tag_index.get(tag))
            .flat_map(|keys| keys.iter().cloned())
            .collect();
        let mut removed = 0;
        for key in &keys {
            if state.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let now = Instant::now();
        let state = self.state.lock();
        Ok(state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    /// Expired entries are swept first so they are not counted
    fn footprint(&self) -> Option<StoreFootprint> {
        let swept = self.remove_expired_entries();
        if swept > 0 {
            tracing::debug!("Memory tier swept {} expired entries", swept);
        }
        let state = self.state.lock();
        Some(StoreFootprint {
            entries: state.entries.len() as u64,
            bytes: state.entries.iter().map(|(_, entry)| entry.bytes).sum(),
        })
    }
}
