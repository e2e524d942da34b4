//! Fluent one-shot operation context.
//!
//! ```rust
//! use serde_json::json;
//! use tiercache_core::{CacheConfig, CacheLevel, CacheManager};
//!
//! let cache = CacheManager::in_memory(CacheConfig::default()).unwrap();
//! cache
//!     .context()
//!     .namespace("reputation")
//!     .tags(["ip"])
//!     .ttl(900)
//!     .levels(&[CacheLevel::Memory])
//!     .put("203.0.113.7", json!({"score": 12}));
//!
//! assert!(cache.invalidate_by_tags(["ip"]));
//! ```

use std::collections::BTreeSet;

use serde_json::Value;

use crate::key::CacheKey;
use crate::level::{CacheLevel, TtlRequest};
use crate::manager::CacheManager;

/// Overrides applied to exactly one following operation
#[must_use = "a context does nothing until an operation consumes it"]
pub struct CacheContext<'a> {
    manager: &'a CacheManager,
    tags: BTreeSet<String>,
    prefix: Option<String>,
    namespace: Option<String>,
    ttl: Option<i64>,
    levels: Option<Vec<CacheLevel>>,
}

impl<'a> CacheContext<'a> {
    pub(crate) fn new(manager: &'a CacheManager) -> Self {
        Self {
            manager,
            tags: BTreeSet::new(),
            prefix: None,
            namespace: None,
            ttl: None,
            levels: None,
        }
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn ttl(mut self, ttl: i64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn levels(mut self, levels: &[CacheLevel]) -> Self {
        self.levels = Some(levels.to_vec());
        self
    }

    fn key(&self, key: impl Into<CacheKey>) -> CacheKey {
        let mut key = self.manager.key(key).with_tags(self.tags.iter().cloned());
        if let Some(prefix) = &self.prefix {
            key = key.with_prefix(prefix.clone());
        }
        if let Some(namespace) = &self.namespace {
            key = key.with_namespace(namespace.clone());
        }
        if let Some(ttl) = self.ttl {
            key = key.with_ttl(ttl);
        }
        key
    }

    fn ttl_request(&self) -> TtlRequest {
        TtlRequest::from(self.ttl)
    }

    pub fn get(self, key: impl Into<CacheKey>) -> Option<Value> {
        let key = self.key(key);
        self.manager.operations().get(&key, self.levels.as_deref())
    }

    pub fn put(self, key: impl Into<CacheKey>, value: impl Into<Value>) -> bool {
        let key = self.key(key);
        self.manager
            .operations()
            .put(&key, &value.into(), self.ttl_request(), self.levels.as_deref())
    }

    pub fn forget(self, key: impl Into<CacheKey>) -> bool {
        let key = self.key(key);
        self.manager.operations().forget(&key, self.levels.as_deref())
    }

    pub fn remember<F>(self, key: impl Into<CacheKey>, producer: F) -> Value
    where
        F: FnOnce() -> Value,
    {
        let key = self.key(key);
        let operations = self.manager.operations();
        if let Some(value) = operations.get(&key, self.levels.as_deref()) {
            return value;
        }
        let value = producer();
        if !value.is_null() {
            operations.put(&key, &value, self.ttl_request(), self.levels.as_deref());
        }
        value
    }

    pub fn invalidate(self, key: impl Into<CacheKey>) -> bool {
        let key = self.key(key);
        self.manager.invalidation().invalidate(&key, self.levels.as_deref())
    }
}
