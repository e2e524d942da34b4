//! # tiercache-core
//!
//! Multi-tier cache orchestration for the expensive lookups of a
//! spam-detection application (reputation checks, geolocation,
//! configuration, scoring).
//!
//! ## Architecture
//!
//! ```text
//! CacheManager ──► operation ──► Request ─► Memory ─► Database
//!      │           invalidation        (LevelStore adapters)
//!      │           warming
//!      │           statistics
//!      │           maintenance ─────────────────────► StoreMaintenance
//!      └────────── CacheRuntime (counters, dependencies, level toggles)
//! ```
//!
//! - **Levels**: tier metadata and TTL resolution
//! - **Keys**: canonical `prefix:namespace:key` identities with validation
//! - **Services**: narrow operation, invalidation, warming, statistics and maintenance APIs
//! - **Config**: typed configuration layered from defaults, TOML and environment
//!
//! Reads fall back from the fastest enabled level to the slowest and copy a
//! hit into the faster levels. Store faults are logged and surface as
//! `false` / `None`; only configuration is ever rejected with an error.

pub mod config;
pub mod context;
pub mod error;
pub mod key;
pub mod level;
pub mod manager;
pub mod pattern;
pub mod runtime;
pub mod service;
pub mod telemetry;

pub use config::{CacheConfig, ConfigLoader, LevelConfig, ValidateConfig};
pub use context::CacheContext;
pub use error::{CacheError, Result};
pub use key::{CacheKey, ValidationError, ValidationReport};
pub use level::{CacheLevel, LevelSpec, TtlRequest};
pub use manager::{CacheManager, CacheManagerBuilder};
pub use service::{
    CacheHealth, CacheStats, InvalidationEvent, InvalidationKind, InvalidationListener, MaintenanceReport,
    MemoryProbe, MemoryTrend, PutManyReport, WarmStatus, Warmer, WarmingReport,
};

pub use tiercache_store::{LevelStore, StoreError};
