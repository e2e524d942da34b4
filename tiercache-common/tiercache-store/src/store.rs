//! # Level Store Contract
//!
//! The trait every cache tier adapter implements, plus the optional
//! maintenance surface exposed by persistent tiers.
//!
//! Keys handed to an adapter are already canonical (`prefix:namespace:key`).
//! A `ttl` of `None` means the entry never expires.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, StoreError};

/// Approximate size of the data held by one adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreFootprint {
    /// Live entries
    pub entries: u64,
    /// Approximate payload bytes (keys + serialized values)
    pub bytes: u64,
}

/// Point-in-time view of a persistent store used by maintenance reports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreSnapshot {
    pub total_entries: u64,
    pub expired_entries: u64,
    pub tagged_entries: u64,
    pub size_bytes: u64,
}

/// Per-tier persistence adapter
pub trait LevelStore: Send + Sync {
    /// Adapter name, used in log output only
    fn name(&self) -> &str;

    /// Read a live value
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Read a live value with the tags it was stored under
    fn get_tagged(&self, key: &str) -> Result<Option<(Value, BTreeSet<String>)>> {
        Ok(self.get(key)?.map(|value| (value, BTreeSet::new())))
    }

    /// Write a value; `tags` are recorded by tag-capable adapters and ignored otherwise
    fn put(&self, key: &str, value: &Value, ttl: Option<Duration>, tags: &BTreeSet<String>)
        -> Result<()>;

    /// Remove a value, returning whether an entry existed
    fn forget(&self, key: &str) -> Result<bool>;

    /// Remove every entry
    fn flush(&self) -> Result<()>;

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Batched read; absent keys are omitted from the result
    fn many(&self, keys: &[String]) -> Result<HashMap<String, Value>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// Batched write; each item reports its own outcome
    fn put_many(&self, items: &[(String, Value)], ttl: Option<Duration>) -> Vec<(String, Result<()>)> {
        let no_tags = BTreeSet::new();
        items
            .iter()
            .map(|(key, value)| (key.clone(), self.put(key, value, ttl, &no_tags)))
            .collect()
    }

    /// Add `by` to an integer value (missing keys start at zero)
    fn increment(&self, key: &str, by: i64) -> Result<i64>;

    fn decrement(&self, key: &str, by: i64) -> Result<i64> {
        self.increment(key, by.saturating_neg())
    }

    /// Remove every entry carrying any of `tags`
    fn forget_tagged(&self, _tags: &[String]) -> Result<usize> {
        Err(StoreError::Unsupported("tag removal"))
    }

    /// List live identifiers, used for pattern scans
    fn keys(&self) -> Result<Vec<String>> {
        Err(StoreError::Unsupported("key scan"))
    }

    /// Size estimate, if the adapter can compute one cheaply
    fn footprint(&self) -> Option<StoreFootprint> {
        None
    }

    /// Housekeeping surface of persistent adapters
    fn maintenance(&self) -> Option<&dyn StoreMaintenance> {
        None
    }
}

/// Housekeeping operations offered by persistent tiers
pub trait StoreMaintenance: Send + Sync {
    /// Delete expired rows, returning how many were removed
    fn cleanup_expired(&self) -> Result<u64>;

    fn optimize(&self) -> Result<()>;

    /// Refresh planner statistics and report usage
    fn analyze(&self) -> Result<StoreSnapshot>;

    /// Reclaim free space, returning bytes released
    fn vacuum(&self) -> Result<u64>;

    fn reindex(&self) -> Result<()>;

    /// `true` when the backing file passes its integrity check
    fn integrity_check(&self) -> Result<bool>;

    fn snapshot(&self) -> Result<StoreSnapshot>;
}

/// Interpret a stored value as an integer counter
pub fn numeric_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Rough serialized size of a value
pub fn estimated_size(key: &str, value: &Value) -> u64 {
    let value_len = match value {
        Value::String(s) => s.len() + 2,
        other => other.to_string().len(),
    };
    (key.len() + value_len) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_value() {
        assert_eq!(numeric_value(&json!(5)), Some(5));
        assert_eq!(numeric_value(&json!(" 12 ")), Some(12));
        assert_eq!(numeric_value(&json!("twelve")), None);
        assert_eq!(numeric_value(&json!(1.5)), None);
        assert_eq!(numeric_value(&json!({"a": 1})), None);
    }

    #[test]
    fn test_estimated_size() {
        assert_eq!(estimated_size("k", &json!("ab")), 5);
        assert_eq!(estimated_size("key", &json!(42)), 5);
    }
}
