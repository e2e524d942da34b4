//! # Cache Levels
//!
//! Tier identities and their metadata.
//!
//! | Level | Priority | Default TTL | Max TTL | Tags | Distributed |
//! |-------|----------|-------------|---------|------|-------------|
//! | Request | 1 | scope | scope | yes | no |
//! | Memory | 2 | 1h | 1d | yes | no |
//! | Database | 3 | 2h | 7d | yes | yes |
//!
//! Lower priority numbers are faster and are consulted first.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// One cache tier, ordered fastest to slowest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLevel {
    Request,
    Memory,
    Database,
}

impl CacheLevel {
    /// Every level in ascending priority order
    pub const ALL: [CacheLevel; 3] = [CacheLevel::Request, CacheLevel::Memory, CacheLevel::Database];

    pub fn priority(self) -> u8 {
        match self {
            CacheLevel::Request => 1,
            CacheLevel::Memory => 2,
            CacheLevel::Database => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CacheLevel::Request => "request",
            CacheLevel::Memory => "memory",
            CacheLevel::Database => "database",
        }
    }

    /// Built-in metadata for this level
    pub fn default_spec(self) -> LevelSpec {
        match self {
            CacheLevel::Request => LevelSpec {
                level: self,
                priority: 1,
                default_ttl: None,
                max_ttl: None,
                supports_tagging: true,
                supports_distribution: false,
                latency_range: LatencyRange::new(0.0, 0.1),
                driver_name: "array".to_string(),
            },
            CacheLevel::Memory => LevelSpec {
                level: self,
                priority: 2,
                default_ttl: Some(3600),
                max_ttl: Some(86_400),
                supports_tagging: true,
                supports_distribution: false,
                latency_range: LatencyRange::new(0.1, 2.0),
                driver_name: "memory".to_string(),
            },
            CacheLevel::Database => LevelSpec {
                level: self,
                priority: 3,
                default_ttl: Some(7200),
                max_ttl: Some(604_800),
                supports_tagging: true,
                supports_distribution: true,
                latency_range: LatencyRange::new(1.0, 50.0),
                driver_name: "sqlite".to_string(),
            },
        }
    }
}

impl fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheLevel {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "request" => Ok(CacheLevel::Request),
            "memory" => Ok(CacheLevel::Memory),
            "database" => Ok(CacheLevel::Database),
            other => Err(CacheError::configuration(format!("unknown cache level '{}'", other))),
        }
    }
}

/// Expected latency envelope in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyRange {
    pub min_ms: f64,
    pub max_ms: f64,
}

impl LatencyRange {
    pub const fn new(min_ms: f64, max_ms: f64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn contains(&self, ms: f64) -> bool {
        ms <= self.max_ms
    }
}

/// How the caller asked for a TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlRequest {
    /// Use the level default
    Default,
    /// Explicit seconds; `<= 0` means no expiration
    Seconds(i64),
    /// Use the level maximum
    Maximum,
}

impl From<Option<i64>> for TtlRequest {
    fn from(ttl: Option<i64>) -> Self {
        ttl.map_or(TtlRequest::Default, TtlRequest::Seconds)
    }
}

/// Metadata describing one level
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSpec {
    pub level: CacheLevel,
    pub priority: u8,
    /// Seconds; `None` means no expiration
    pub default_ttl: Option<u64>,
    /// Seconds; `None` means unbounded
    pub max_ttl: Option<u64>,
    pub supports_tagging: bool,
    pub supports_distribution: bool,
    pub latency_range: LatencyRange,
    pub driver_name: String,
}

impl LevelSpec {
    /// Effective TTL for a write at this level; `None` means no expiration.
    ///
    /// The request level ignores TTLs entirely.
    pub fn resolve_ttl(&self, request: TtlRequest) -> Option<Duration> {
        if self.level == CacheLevel::Request {
            return None;
        }

        let seconds = match request {
            TtlRequest::Default => self.default_ttl.filter(|ttl| *ttl > 0)?,
            TtlRequest::Seconds(ttl) if ttl <= 0 => return None,
            TtlRequest::Seconds(ttl) => {
                let ttl = ttl as u64;
                match self.max_ttl {
                    Some(max) if max > 0 => ttl.clamp(1, max),
                    _ => ttl.max(1),
                }
            }
            TtlRequest::Maximum => self.max_ttl.filter(|ttl| *ttl > 0)?,
        };

        Some(Duration::from_secs(seconds))
    }
}
