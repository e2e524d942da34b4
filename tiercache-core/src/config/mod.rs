//! # tiercache Configuration
//!
//! ## Configuration Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Environment Variables          │
//! │    TIERCACHE_MEMORY_ENABLED=false       │
//! ├─────────────────────────────────────────┤
//! │       Config File (tiercache.toml)      │
//! │    [levels.memory]                      │
//! │    enabled = false                      │
//! ├─────────────────────────────────────────┤
//! │         Default Values                  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Every layer is applied as a deep merge onto the previous one and the
//! result is deserialized with unknown fields denied, so a scalar where a
//! mapping is expected or an undeclared level name fails the whole layer.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod level;
mod loader;

pub use level::{LevelConfig, LevelsConfig};
pub use loader::ConfigLoader;

use crate::error::{CacheError, Result};
use crate::key::{DEFAULT_PREFIX, MAX_KEY_LENGTH};

/// Default warming batch size
pub const DEFAULT_WARMING_BATCH_SIZE: usize = 50;

/// Default soft time budget per warming batch in milliseconds
pub const DEFAULT_BATCH_TIME_BUDGET_MS: u64 = 5_000;

/// Default rolling window for memory samples
pub const DEFAULT_MEMORY_WINDOW: usize = 10;

/// Configuration validation
pub trait ValidateConfig {
    fn validate(&self) -> Result<()>;
}

fn validation_error(msg: impl Into<String>) -> CacheError {
    CacheError::configuration(format!("Validation error: {}", msg.into()))
}

/// Warming configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WarmingConfig {
    /// Warmers per batch
    pub batch_size: usize,

    /// Soft time budget per batch; exceeding it only flags the batch
    pub batch_time_budget_ms: u64,
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_WARMING_BATCH_SIZE,
            batch_time_budget_ms: DEFAULT_BATCH_TIME_BUDGET_MS,
        }
    }
}

impl ValidateConfig for WarmingConfig {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > 10_000 {
            return Err(validation_error(format!(
                "warming.batch_size must be within 1..=10000 (got {})",
                self.batch_size
            )));
        }
        if self.batch_time_budget_ms == 0 {
            return Err(validation_error("warming.batch_time_budget_ms cannot be zero"));
        }
        Ok(())
    }
}

/// Statistics configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StatisticsConfig {
    /// Sample process memory on every orchestration operation
    pub track_memory: bool,

    /// Number of memory samples kept for trend detection
    pub memory_window: usize,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            track_memory: true,
            memory_window: DEFAULT_MEMORY_WINDOW,
        }
    }
}

impl ValidateConfig for StatisticsConfig {
    fn validate(&self) -> Result<()> {
        if !(3..=1000).contains(&self.memory_window) {
            return Err(validation_error(format!(
                "statistics.memory_window must be within 3..=1000 (got {})",
                self.memory_window
            )));
        }
        Ok(())
    }
}

/// Memory tier sizing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryTierConfig {
    /// Maximum entries before LRU eviction
    pub max_entries: usize,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            max_entries: tiercache_store::memory::DEFAULT_MAX_ENTRIES,
        }
    }
}

impl ValidateConfig for MemoryTierConfig {
    fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(validation_error("memory.max_entries must be greater than 0"));
        }
        Ok(())
    }
}

/// Persistent tier location
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite file; `None` keeps the tier in memory
    pub path: Option<PathBuf>,
}

impl ValidateConfig for DatabaseConfig {
    fn validate(&self) -> Result<()> {
        if matches!(&self.path, Some(path) if path.as_os_str().is_empty()) {
            return Err(validation_error("database.path cannot be empty"));
        }
        Ok(())
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Prefix of every canonical key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default)]
    pub levels: LevelsConfig,

    #[serde(default)]
    pub warming: WarmingConfig,

    #[serde(default)]
    pub statistics: StatisticsConfig,

    #[serde(default)]
    pub memory: MemoryTierConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            levels: LevelsConfig::default(),
            warming: WarmingConfig::default(),
            statistics: StatisticsConfig::default(),
            memory: MemoryTierConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl CacheConfig {
    /// JSON snapshot of this configuration
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Apply a partial update, returning the new configuration.
    ///
    /// `self` is never modified; callers swap the result in on success.
    pub fn merged(&self, patch: Value) -> Result<CacheConfig> {
        if !patch.is_object() {
            return Err(CacheError::configuration(
                "configuration update must be a mapping",
            ));
        }

        let mut merged = self.to_value()?;
        merge_values(&mut merged, patch);

        let config: CacheConfig = serde_json::from_value(merged).map_err(|e| {
            CacheError::configuration(format!("Invalid configuration update: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }
}

impl ValidateConfig for CacheConfig {
    fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() || self.key_prefix.len() > MAX_KEY_LENGTH {
            return Err(validation_error("key_prefix must be 1..=255 characters"));
        }
        if !self
            .key_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(validation_error(format!(
                "key_prefix '{}' contains invalid characters",
                self.key_prefix
            )));
        }

        self.levels.validate()?;
        self.warming.validate()?;
        self.statistics.validate()?;
        self.memory.validate()?;
        self.database.validate()?;
        Ok(())
    }
}

fn default_key_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

/// Deep-merge `patch` into `base`; mappings merge, everything else replaces
pub(crate) fn merge_values(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}
