//! # Configuration Loader
//!
//! Loads and merges configuration from multiple sources:
//! 1. Default values (lowest priority)
//! 2. Configuration file (middle priority)
//! 3. Environment variables (highest priority)

use std::env;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

use super::{CacheConfig, ValidateConfig};
use crate::error::{CacheError, Result};
use crate::level::CacheLevel;

const DEFAULT_ENV_PREFIX: &str = "TIERCACHE";

/// Configuration loader with support for file and environment variable overrides
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Path to configuration file
    config_path: PathBuf,

    /// Environment variable prefix
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config loader with a specific config file path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    /// Use a custom environment prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn default_config_path() -> PathBuf {
        if let Ok(config_path) = env::var("TIERCACHE_CONFIG") {
            return PathBuf::from(config_path);
        }

        let mut possible_paths = vec![PathBuf::from("tiercache.toml")];
        if let Some(dir) = dirs::config_dir() {
            possible_paths.push(dir.join("tiercache").join("config.toml"));
        }

        for path in &possible_paths {
            if path.exists() {
                return path.clone();
            }
        }

        possible_paths.swap_remove(0)
    }

    /// Load configuration with full hierarchy
    pub fn load(&self) -> Result<CacheConfig> {
        let mut config = CacheConfig::default();

        if self.config_path.exists() {
            let file_patch = self.load_from_file()?;
            config = config.merged(file_patch)?;
        }

        let env_patch = self.env_patch(|name| env::var(name).ok())?;
        if env_patch.as_object().map_or(false, |patch| !patch.is_empty()) {
            config = config.merged(env_patch)?;
        }

        config.validate().map_err(|e| {
            CacheError::configuration(format!("Configuration validation failed: {}", e))
        })?;

        tracing::debug!("Loaded cache configuration from {}", self.config_path.display());
        Ok(config)
    }

    /// Parse the configuration file into a merge patch
    fn load_from_file(&self) -> Result<Value> {
        let content = std::fs::read_to_string(&self.config_path).map_err(|e| {
            CacheError::configuration(format!(
                "Failed to read config file '{}': {}",
                self.config_path.display(),
                e
            ))
        })?;

        let table: toml::Value = toml::from_str(&content).map_err(|e| {
            CacheError::configuration(format!(
                "Failed to parse config file '{}': {}",
                self.config_path.display(),
                e
            ))
        })?;

        Ok(serde_json::to_value(table)?)
    }

    /// Build a merge patch from environment variables read through `lookup`
    fn env_patch<F>(&self, lookup: F) -> Result<Value>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}_{}", self.env_prefix, suffix));
        let mut patch = Map::new();

        if let Some(prefix) = var("KEY_PREFIX") {
            patch.insert("key_prefix".into(), json!(prefix));
        }

        let mut levels = Map::new();
        for level in CacheLevel::ALL {
            let upper = level.as_str().to_ascii_uppercase();
            let mut section = Map::new();

            if let Some(value) = var(&format!("{}_ENABLED", upper)) {
                section.insert("enabled".into(), json!(parse_bool(&value)?));
            }
            if let Some(value) = var(&format!("{}_DRIVER", upper)) {
                section.insert("driver".into(), json!(value));
            }
            for field in ["default_ttl", "max_ttl"] {
                if let Some(value) = var(&format!("{}_{}", upper, field.to_ascii_uppercase())) {
                    section.insert(field.into(), parse_ttl(&value)?);
                }
            }

            if !section.is_empty() {
                levels.insert(level.as_str().into(), Value::Object(section));
            }
        }
        if !levels.is_empty() {
            patch.insert("levels".into(), Value::Object(levels));
        }

        if let Some(value) = var("WARMING_BATCH_SIZE") {
            patch.insert("warming".into(), json!({ "batch_size": parse_number(&value)? }));
        }
        if let Some(value) = var("MEMORY_MAX_ENTRIES") {
            patch.insert("memory".into(), json!({ "max_entries": parse_number(&value)? }));
        }
        if let Some(value) = var("DATABASE_PATH") {
            patch.insert("database".into(), json!({ "path": value }));
        }

        Ok(Value::Object(patch))
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(CacheError::configuration(format!("Invalid boolean value: {}", other))),
    }
}

fn parse_number(value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| CacheError::configuration(format!("Invalid numeric value: {}", value)))
}

/// `none` / empty clears the TTL
fn parse_ttl(value: &str) -> Result<Value> {
    match value.trim() {
        "" | "none" | "null" => Ok(Value::Null),
        other => Ok(json!(parse_number(other)?)),
    }
}
