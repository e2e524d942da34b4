//! # Request-scoped Store
//!
//! Plain map living for one request scope. TTLs are ignored; the owner
//! clears it with [`LevelStore::flush`] when the scope ends. Tags are kept
//! alongside each value so tag invalidation reaches this tier too.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::store::{estimated_size, numeric_value, LevelStore, StoreFootprint};

#[derive(Debug, Clone)]
struct RequestEntry {
    value: Value,
    tags: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct RequestStore {
    entries: RwLock<HashMap<String, RequestEntry>>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl LevelStore for RequestStore {
    fn name(&self) -> &str {
        "array"
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().get(key).map(|entry| entry.value.clone()))
    }

    fn get_tagged(&self, key: &str) -> Result<Option<(Value, BTreeSet<String>)>> {
        Ok(self
            .entries
            .read()
            .get(key)
            .map(|entry| (entry.value.clone(), entry.tags.clone())))
    }

    fn put(&self, key: &str, value: &Value, _ttl: Option<Duration>, tags: &BTreeSet<String>) -> Result<()> {
        self.entries.write().insert(
            key.to_string(),
            RequestEntry {
                value: value.clone(),
                tags: tags.clone(),
            },
        );
        Ok(())
    }

    fn forget(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn flush(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().contains_key(key))
    }

    fn increment(&self, key: &str, by: i64) -> Result<i64> {
        let mut entries = self.entries.write();
        let (current, tags) = match entries.get(key) {
            Some(entry) => (
                numeric_value(&entry.value).ok_or_else(|| StoreError::NotNumeric(key.to_string()))?,
                entry.tags.clone(),
            ),
            None => (0, BTreeSet::new()),
        };
        let next = current.saturating_add(by);
        entries.insert(
            key.to_string(),
            RequestEntry {
                value: Value::from(next),
                tags,
            },
        );
        Ok(next)
    }

    fn forget_tagged(&self, tags: &[String]) -> Result<usize> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !tags.iter().any(|tag| entry.tags.contains(tag)));
        Ok(before - entries.len())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn footprint(&self) -> Option<StoreFootprint> {
        let entries = self.entries.read();
        Some(StoreFootprint {
            entries: entries.len() as u64,
            bytes: entries.iter().map(|(k, entry)| estimated_size(k, &entry.value)).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ttl_is_ignored() {
        let store = RequestStore::new();
        store
            .put("k", &json!("v"), Some(Duration::from_millis(1)), &BTreeSet::new())
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.get("k").unwrap(), Some(json!("v")));
    }

    #[test]
    fn test_increment_rejects_text() {
        let store = RequestStore::new();
        store.put("n", &json!("abc"), None, &BTreeSet::new()).unwrap();
        assert!(matches!(store.increment("n", 1), Err(StoreError::NotNumeric(_))));
        assert_eq!(store.increment("fresh", 3).unwrap(), 3);
        assert_eq!(store.decrement("fresh", 1).unwrap(), 2);
    }

    #[test]
    fn test_forget_tagged() {
        let store = RequestStore::new();
        let geo: BTreeSet<String> = ["geo".to_string()].into_iter().collect();
        let spam: BTreeSet<String> = ["spam".to_string()].into_iter().collect();
        store.put("a", &json!(1), None, &geo).unwrap();
        store.put("b", &json!(2), None, &spam).unwrap();
        store.put("c", &json!(3), None, &BTreeSet::new()).unwrap();

        assert_eq!(store.forget_tagged(&["geo".to_string()]).unwrap(), 1);
        assert!(!store.has("a").unwrap());
        assert!(store.has("b").unwrap());
        assert!(store.has("c").unwrap());
        assert_eq!(store.get_tagged("b").unwrap(), Some((json!(2), spam)));
    }

    #[test]
    fn test_increment_keeps_tags() {
        let store = RequestStore::new();
        let tags: BTreeSet<String> = ["counter".to_string()].into_iter().collect();
        store.put("n", &json!(1), None, &tags).unwrap();
        assert_eq!(store.increment("n", 1).unwrap(), 2);
        assert_eq!(store.forget_tagged(&["counter".to_string()]).unwrap(), 1);
    }
}
