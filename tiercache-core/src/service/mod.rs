//! # Cache Services
//!
//! Narrow services composed by [`CacheManager`](crate::manager::CacheManager).
//! Every service shares one [`CacheRuntime`](crate::runtime::CacheRuntime).

pub mod invalidation;
pub mod maintenance;
pub mod operation;
pub mod statistics;
pub mod warming;

pub use invalidation::{CacheInvalidationService, InvalidationEvent, InvalidationKind, InvalidationListener};
pub use maintenance::{
    CacheMaintenanceService, CompactMaintenanceReport, DetailedMaintenanceReport, MaintenanceOperation,
    MaintenanceReport,
};
pub use operation::{CacheOperationService, PutManyReport};
pub use statistics::{
    CacheHealth, CacheStatisticsService, CacheStats, FixedProbe, LevelStats, MemoryProbe, MemoryTrend,
    SysinfoProbe,
};
pub use warming::{
    CacheWarmingService, Producer, StrategyInfo, StrategyRunReport, WarmStatus, Warmer, WarmerResult,
    WarmingReport, WarmingRunStats,
};
