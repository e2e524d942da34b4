//! # tiercache Error Types
//!
//! Centralized error handling for the orchestration engine.
//!
//! Most cache faults never reach the caller: operations absorb them and
//! report `false` / `None`. The variants below surface where an explicit
//! `Result` is part of the contract (configuration updates, counters).

use thiserror::Error;
use tiercache_store::StoreError;

/// Result type alias for tiercache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Core error types for tiercache
#[derive(Error, Debug)]
pub enum CacheError {
    /// Level store failures
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed cache keys
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Counter operations on non-numeric values
    #[error("Value for '{0}' is not numeric")]
    NotNumeric(String),

    /// No enabled level can serve the request
    #[error("No enabled cache level available: {0}")]
    NoLevel(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Create a new configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new invalid key error
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }

    /// Create a new no-level error
    pub fn no_level(msg: impl Into<String>) -> Self {
        Self::NoLevel(msg.into())
    }

    /// Check if this is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
