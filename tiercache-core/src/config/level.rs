//! # Level Configuration
//!
//! Per-tier enabled flag, driver identifier and TTL bounds.

use serde::{Deserialize, Serialize};

use super::{validation_error, ValidateConfig};
use crate::error::Result;
use crate::key::MAX_REASONABLE_TTL;
use crate::level::{CacheLevel, LevelSpec};

/// Configuration of one cache level
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LevelConfig {
    /// Whether the level takes part in reads and writes
    pub enabled: bool,

    /// Driver identifier (informational)
    pub driver: String,

    /// Default TTL in seconds, `None` for no expiration
    pub default_ttl: Option<u64>,

    /// Maximum TTL in seconds, `None` for unbounded
    pub max_ttl: Option<u64>,
}

impl LevelConfig {
    /// Defaults taken from the built-in level metadata
    pub fn for_level(level: CacheLevel) -> Self {
        let spec = level.default_spec();
        Self {
            enabled: true,
            driver: spec.driver_name,
            default_ttl: spec.default_ttl,
            max_ttl: spec.max_ttl,
        }
    }

    /// Overlay this configuration on the built-in metadata of `level`
    pub fn spec(&self, level: CacheLevel) -> LevelSpec {
        let mut spec = level.default_spec();
        spec.driver_name = self.driver.clone();
        spec.default_ttl = self.default_ttl;
        spec.max_ttl = self.max_ttl;
        spec
    }

    fn validate_for(&self, level: CacheLevel) -> Result<()> {
        if self.driver.trim().is_empty() {
            return Err(validation_error(format!("levels.{}.driver cannot be empty", level)));
        }

        if let (Some(default_ttl), Some(max_ttl)) = (self.default_ttl, self.max_ttl) {
            if max_ttl > 0 && default_ttl > max_ttl {
                return Err(validation_error(format!(
                    "levels.{}.default_ttl ({}) exceeds max_ttl ({})",
                    level, default_ttl, max_ttl
                )));
            }
        }

        for (name, ttl) in [("default_ttl", self.default_ttl), ("max_ttl", self.max_ttl)] {
            if matches!(ttl, Some(ttl) if ttl > MAX_REASONABLE_TTL as u64) {
                return Err(validation_error(format!(
                    "levels.{}.{} is too large (max: {}s)",
                    level, name, MAX_REASONABLE_TTL
                )));
            }
        }

        Ok(())
    }
}

/// The declared levels; any other level name is rejected
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LevelsConfig {
    #[serde(default = "default_request")]
    pub request: LevelConfig,

    #[serde(default = "default_memory")]
    pub memory: LevelConfig,

    #[serde(default = "default_database")]
    pub database: LevelConfig,
}

impl Default for LevelsConfig {
    fn default() -> Self {
        Self {
            request: default_request(),
            memory: default_memory(),
            database: default_database(),
        }
    }
}

impl LevelsConfig {
    pub fn get(&self, level: CacheLevel) -> &LevelConfig {
        match level {
            CacheLevel::Request => &self.request,
            CacheLevel::Memory => &self.memory,
            CacheLevel::Database => &self.database,
        }
    }

    pub fn get_mut(&mut self, level: CacheLevel) -> &mut LevelConfig {
        match level {
            CacheLevel::Request => &mut self.request,
            CacheLevel::Memory => &mut self.memory,
            CacheLevel::Database => &mut self.database,
        }
    }
}

impl ValidateConfig for LevelsConfig {
    fn validate(&self) -> Result<()> {
        for level in CacheLevel::ALL {
            self.get(level).validate_for(level)?;
        }
        Ok(())
    }
}

fn default_request() -> LevelConfig {
    LevelConfig::for_level(CacheLevel::Request)
}

fn default_memory() -> LevelConfig {
    LevelConfig::for_level(CacheLevel::Memory)
}

fn default_database() -> LevelConfig {
    LevelConfig::for_level(CacheLevel::Database)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_level_metadata() {
        let levels = LevelsConfig::default();
        assert_eq!(levels.memory.default_ttl, Some(3600));
        assert_eq!(levels.database.max_ttl, Some(604_800));
        assert_eq!(levels.request.driver, "array");
        assert!(levels.validate().is_ok());
    }

    #[test]
    fn test_default_above_max_rejected() {
        let mut levels = LevelsConfig::default();
        levels.memory.default_ttl = Some(100_000);
        assert!(levels.validate().is_err());
    }

    #[test]
    fn test_spec_overlay() {
        let mut config = LevelConfig::for_level(CacheLevel::Database);
        config.max_ttl = Some(60);
        let spec = config.spec(CacheLevel::Database);
        assert_eq!(spec.max_ttl, Some(60));
        assert!(spec.supports_distribution);
    }
}
