//! # Cache Operations
//!
//! Cross-tier reads and writes. Reads consult levels fastest first and copy
//! a hit into the faster levels that missed; writes fan out to every target
//! level independently. Store faults are logged and absorbed.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tiercache_store::StoreError;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use crate::level::{CacheLevel, TtlRequest};
use crate::runtime::CacheRuntime;

/// Outcome of [`CacheOperationService::put_many`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PutManyReport {
    /// Keys written to every target level
    pub stored: Vec<String>,
    /// Key -> failure reason
    pub failed: HashMap<String, String>,
}

impl PutManyReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct CacheOperationService {
    runtime: Arc<CacheRuntime>,
}

impl CacheOperationService {
    pub fn new(runtime: Arc<CacheRuntime>) -> Self {
        Self { runtime }
    }

    /// First non-null value found, fastest level first
    pub fn get(&self, key: &CacheKey, levels: Option<&[CacheLevel]>) -> Option<Value> {
        let start = Instant::now();
        self.runtime.sample_memory();

        if !key.is_valid() {
            warn!("Rejected read of invalid key {}: {}", key, key.validate());
            self.runtime.stats.record_miss(start.elapsed());
            return None;
        }

        let canonical = key.canonical();
        let candidates = self.runtime.candidate_levels(levels);

        for (index, &level) in candidates.iter().enumerate() {
            if !self.runtime.is_enabled(level) {
                continue;
            }
            let Some(store) = self.runtime.store(level) else {
                continue;
            };

            match store.get_tagged(&canonical) {
                Ok(Some((value, stored_tags))) if !value.is_null() => {
                    self.runtime.stats.record_hit(level, start.elapsed());
                    let mut tags = stored_tags;
                    tags.extend(key.tags().iter().cloned());
                    self.backfill(key, &canonical, &value, &tags, &candidates[..index]);
                    return Some(value);
                }
                Ok(_) => {}
                Err(e) => warn!("Cache read failed at {} for {}: {}", level, canonical, e),
            }
        }

        self.runtime.stats.record_miss(start.elapsed());
        None
    }

    /// Copies keep the tags of the entry they were read from
    fn backfill(
        &self,
        key: &CacheKey,
        canonical: &str,
        value: &Value,
        tags: &BTreeSet<String>,
        faster: &[CacheLevel],
    ) {
        for &level in faster {
            if !self.runtime.is_enabled(level) {
                continue;
            }
            let Some(store) = self.runtime.store(level) else {
                continue;
            };

            let ttl = self.runtime.spec(level).resolve_ttl(TtlRequest::from(key.ttl()));
            match store.put(canonical, value, ttl, tags) {
                Ok(()) => debug!("Backfilled {} into {}", canonical, level),
                Err(e) => warn!("Backfill of {} into {} failed: {}", canonical, level, e),
            }
        }
    }

    pub fn get_as<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        levels: Option<&[CacheLevel]>,
    ) -> Option<T> {
        let value = self.get(key, levels)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!("Cached value for {} has an unexpected shape: {}", key, e);
                None
            }
        }
    }

    /// Write to every target level; `true` only when all of them succeeded
    pub fn put(
        &self,
        key: &CacheKey,
        value: &Value,
        ttl: TtlRequest,
        levels: Option<&[CacheLevel]>,
    ) -> bool {
        self.runtime.sample_memory();
        self.runtime.stats.record_put();

        match self.write(key, value, ttl, levels) {
            Ok(()) => true,
            Err(reason) => {
                warn!("Cache write of {} incomplete: {}", key, reason);
                false
            }
        }
    }

    fn write(
        &self,
        key: &CacheKey,
        value: &Value,
        ttl: TtlRequest,
        levels: Option<&[CacheLevel]>,
    ) -> std::result::Result<(), String> {
        let report = key.validate();
        if !report.is_valid() {
            return Err(format!("invalid key ({})", report));
        }
        if value.is_null() {
            return Err("null values are not cached".to_string());
        }

        // An explicit TTL wins over the key's own override
        let ttl = match ttl {
            TtlRequest::Default => TtlRequest::from(key.ttl()),
            other => other,
        };

        let targets = self.runtime.candidate_levels(levels);
        if targets.is_empty() {
            return Err("no enabled target level".to_string());
        }

        let canonical = key.canonical();
        let mut failures = Vec::new();
        for level in targets {
            if !self.runtime.is_enabled(level) {
                continue;
            }
            let Some(store) = self.runtime.store(level) else {
                continue;
            };

            let level_ttl = self.runtime.spec(level).resolve_ttl(ttl);
            if let Err(e) = store.put(&canonical, value, level_ttl, key.tags()) {
                failures.push(format!("{}: {}", level, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }

    /// `true` when any targeted level removed an entry
    pub fn forget(&self, key: &CacheKey, levels: Option<&[CacheLevel]>) -> bool {
        self.runtime.sample_memory();
        self.runtime.stats.record_delete();

        let canonical = key.canonical();
        let mut removed = false;
        for level in self.runtime.candidate_levels(levels) {
            let Some(store) = self.runtime.store(level) else {
                continue;
            };
            match store.forget(&canonical) {
                Ok(existed) => removed |= existed,
                Err(e) => warn!("Cache forget failed at {} for {}: {}", level, canonical, e),
            }
        }
        removed
    }

    /// Cached value, or the producer's result written through on a miss
    pub fn remember<F>(&self, key: &CacheKey, ttl: TtlRequest, producer: F) -> Value
    where
        F: FnOnce() -> Value,
    {
        if let Some(value) = self.get(key, None) {
            return value;
        }

        let value = producer();
        if !value.is_null() {
            self.put(key, &value, ttl, None);
        }
        value
    }

    /// Like [`remember`](Self::remember); a failing producer caches nothing
    pub fn try_remember<F>(&self, key: &CacheKey, ttl: TtlRequest, producer: F) -> anyhow::Result<Value>
    where
        F: FnOnce() -> anyhow::Result<Value>,
    {
        if let Some(value) = self.get(key, None) {
            return Ok(value);
        }

        let value = producer()?;
        if !value.is_null() {
            self.put(key, &value, ttl, None);
        }
        Ok(value)
    }

    /// Write only if the primary (fastest enabled) level has no entry
    pub fn add(&self, key: &CacheKey, value: &Value, ttl: TtlRequest) -> bool {
        let Some(primary) = self.runtime.candidate_levels(None).into_iter().next() else {
            return false;
        };
        let Some(store) = self.runtime.store(primary) else {
            return false;
        };

        match store.has(&key.canonical()) {
            Ok(true) => false,
            Ok(false) => self.put(key, value, ttl, None),
            Err(e) => {
                warn!("Cache add could not check {} at {}: {}", key, primary, e);
                false
            }
        }
    }

    /// Values of the keys found, keyed by the caller's key string.
    ///
    /// When two distinct identifiers in the batch share a plain key (same key,
    /// different namespace or prefix) both are reported under their canonical
    /// identifier instead.
    pub fn many(&self, keys: &[CacheKey], levels: Option<&[CacheLevel]>) -> HashMap<String, Value> {
        let mut identities: HashMap<&str, HashSet<String>> = HashMap::new();
        for key in keys {
            identities.entry(key.key()).or_default().insert(key.canonical());
        }

        keys.iter()
            .filter_map(|key| {
                let value = self.get(key, levels)?;
                let label = if identities.get(key.key()).map_or(0, HashSet::len) > 1 {
                    key.canonical()
                } else {
                    key.key().to_string()
                };
                Some((label, value))
            })
            .collect()
    }

    /// Batched write where each item succeeds or fails on its own
    pub fn put_many<T: Serialize>(
        &self,
        items: &[(CacheKey, T)],
        ttl: TtlRequest,
        levels: Option<&[CacheLevel]>,
    ) -> PutManyReport {
        let mut report = PutManyReport::default();

        for (key, item) in items {
            let value = match serde_json::to_value(item) {
                Ok(value) => value,
                Err(e) => {
                    report.failed.insert(key.key().to_string(), format!("serialization failed: {}", e));
                    continue;
                }
            };

            self.runtime.stats.record_put();
            match self.write(key, &value, ttl, levels) {
                Ok(()) => report.stored.push(key.key().to_string()),
                Err(reason) => {
                    report.failed.insert(key.key().to_string(), reason);
                }
            }
        }

        if !report.is_complete() {
            warn!("Batch write stored {} of {} items", report.stored.len(), items.len());
        }
        report
    }

    pub fn has(&self, key: &CacheKey, levels: Option<&[CacheLevel]>) -> bool {
        let canonical = key.canonical();
        self.runtime.candidate_levels(levels).into_iter().any(|level| {
            self.runtime
                .store(level)
                .map_or(false, |store| store.has(&canonical).unwrap_or_else(|e| {
                    warn!("Cache lookup failed at {} for {}: {}", level, canonical, e);
                    false
                }))
        })
    }

    /// Empty each targeted level; `true` when every flush succeeded
    pub fn flush(&self, levels: Option<&[CacheLevel]>) -> bool {
        let mut ok = true;
        for level in self.runtime.candidate_levels(levels) {
            if let Some(store) = self.runtime.store(level) {
                if let Err(e) = store.flush() {
                    warn!("Cache flush failed at {}: {}", level, e);
                    ok = false;
                }
            }
        }
        ok
    }

    /// Adjust a counter at the slowest targeted level
    pub fn increment(&self, key: &CacheKey, by: i64, levels: Option<&[CacheLevel]>) -> Result<i64> {
        let candidates = self.runtime.candidate_levels(levels);
        let Some((&authoritative, faster)) = candidates.split_last() else {
            return Err(CacheError::no_level(format!("increment of {}", key)));
        };
        let store = self
            .runtime
            .store(authoritative)
            .ok_or_else(|| CacheError::no_level(authoritative.to_string()))?;

        let canonical = key.canonical();
        let value = store.increment(&canonical, by).map_err(|e| match e {
            StoreError::NotNumeric(_) => CacheError::NotNumeric(key.key().to_string()),
            other => CacheError::from(other),
        })?;

        for &level in faster {
            if let Some(store) = self.runtime.store(level) {
                if let Err(e) = store.forget(&canonical) {
                    warn!("Could not drop stale counter {} at {}: {}", canonical, level, e);
                }
            }
        }

        Ok(value)
    }

    pub fn decrement(&self, key: &CacheKey, by: i64, levels: Option<&[CacheLevel]>) -> Result<i64> {
        self.increment(key, by.saturating_neg(), levels)
    }
}
