//! # Cache Statistics
//!
//! Derived views over the runtime counters: hit/miss ratios, latency means,
//! memory trend, per-level size estimates and a coarse health verdict.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, System};
use tracing::debug;

use crate::level::CacheLevel;
use crate::runtime::CacheRuntime;

/// Average entry size used when an adapter reports no footprint
pub const AVERAGE_ENTRY_BYTES: u64 = 1024;

/// Below this many lookups the hit ratio is not judged
pub const HEALTH_MIN_LOOKUPS: u64 = 100;

/// Minimum hit ratio (percent) considered healthy
pub const HEALTHY_HIT_RATIO: f64 = 50.0;

/// Relative change within which the memory trend counts as stable
const TREND_BAND: f64 = 0.05;

/// Source of process memory readings
pub trait MemoryProbe: Send + Sync {
    /// Resident memory of the current process in bytes
    fn current_bytes(&self) -> Option<u64>;
}

/// Reads the current process through `sysinfo`
pub struct SysinfoProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            pid: sysinfo::get_current_pid().ok(),
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn current_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            debug!("Process {} not visible to sysinfo", pid);
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }
}

/// Probe returning a settable constant, for tests and embedded use
#[derive(Debug, Default)]
pub struct FixedProbe {
    bytes: Mutex<Option<u64>>,
}

impl FixedProbe {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes)),
        }
    }

    pub fn set(&self, bytes: Option<u64>) {
        *self.bytes.lock() = bytes;
    }
}

impl MemoryProbe for FixedProbe {
    fn current_bytes(&self) -> Option<u64> {
        *self.bytes.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTrend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

impl MemoryTrend {
    /// Compare the mean of the older half of `samples` with the newer half
    pub fn from_samples(samples: &[u64]) -> Self {
        if samples.len() < 3 {
            return MemoryTrend::InsufficientData;
        }

        let mid = samples.len() / 2;
        let mean = |s: &[u64]| s.iter().map(|&b| b as f64).sum::<f64>() / s.len() as f64;
        let older = mean(&samples[..mid]);
        let newer = mean(&samples[mid..]);

        if older == 0.0 {
            return if newer > 0.0 { MemoryTrend::Increasing } else { MemoryTrend::Stable };
        }

        let change = (newer - older) / older;
        if change > TREND_BAND {
            MemoryTrend::Increasing
        } else if change < -TREND_BAND {
            MemoryTrend::Decreasing
        } else {
            MemoryTrend::Stable
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub current_bytes: u64,
    pub peak_bytes: u64,
    pub samples: usize,
    pub trend: MemoryTrend,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelStats {
    pub enabled: bool,
    pub hits: u64,
    pub average_response_time_ms: f64,
    /// Whether the mean latency sits inside the level's expected envelope
    pub within_latency_envelope: bool,
    pub entries: Option<u64>,
    pub estimated_size_bytes: u64,
}

/// Snapshot returned by `CacheManager::stats`
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub deletes: u64,
    pub invalidations: u64,
    pub cascade_invalidations: u64,
    pub hit_ratio: f64,
    pub miss_ratio: f64,
    pub average_response_time_ms: f64,
    pub levels: BTreeMap<CacheLevel, LevelStats>,
    pub memory: MemoryStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub healthy: bool,
    pub hit_ratio: f64,
    pub lookups: u64,
    pub enabled_levels: Vec<CacheLevel>,
    pub message: String,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `(hit_ratio, miss_ratio)` as percentages rounded to two decimals
pub fn ratios(hits: u64, misses: u64) -> (f64, f64) {
    let total = hits + misses;
    if total == 0 {
        return (0.0, 0.0);
    }
    let hit = round2(hits as f64 / total as f64 * 100.0);
    (hit, round2(100.0 - hit))
}

pub struct CacheStatisticsService {
    runtime: Arc<CacheRuntime>,
}

impl CacheStatisticsService {
    pub fn new(runtime: Arc<CacheRuntime>) -> Self {
        Self { runtime }
    }

    pub fn stats(&self) -> CacheStats {
        let counters = self.runtime.stats.snapshot();
        let (hit_ratio, miss_ratio) = ratios(counters.hits, counters.misses);

        let levels = self
            .runtime
            .registered_levels()
            .into_iter()
            .map(|level| {
                let latency = counters.level_latency.get(&level).copied().unwrap_or_default();
                let (entries, estimated_size_bytes) = self.estimate_size(level);
                let stats = LevelStats {
                    enabled: self.runtime.is_enabled(level),
                    hits: counters.level_hits.get(&level).copied().unwrap_or(0),
                    average_response_time_ms: round2(latency.mean()),
                    within_latency_envelope: latency.count() == 0
                        || self.runtime.spec(level).latency_range.contains(latency.mean()),
                    entries,
                    estimated_size_bytes,
                };
                (level, stats)
            })
            .collect();

        CacheStats {
            hits: counters.hits,
            misses: counters.misses,
            puts: counters.puts,
            deletes: counters.deletes,
            invalidations: counters.invalidations,
            cascade_invalidations: counters.cascade_invalidations,
            hit_ratio,
            miss_ratio,
            average_response_time_ms: round2(counters.latency.mean()),
            levels,
            memory: MemoryStats {
                current_bytes: counters.memory_current,
                peak_bytes: counters.memory_peak,
                samples: counters.memory_window.len(),
                trend: MemoryTrend::from_samples(&counters.memory_window),
            },
        }
    }

    /// `(entries, bytes)` from the adapter footprint, else identifier count x 1024
    fn estimate_size(&self, level: CacheLevel) -> (Option<u64>, u64) {
        let Some(store) = self.runtime.store(level) else {
            return (None, 0);
        };
        if let Some(footprint) = store.footprint() {
            return (Some(footprint.entries), footprint.bytes);
        }
        match store.keys() {
            Ok(keys) => {
                let count = keys.len() as u64;
                (Some(count), count * AVERAGE_ENTRY_BYTES)
            }
            Err(_) => (None, 0),
        }
    }

    pub fn health(&self) -> CacheHealth {
        let counters = self.runtime.stats.snapshot();
        let lookups = counters.hits + counters.misses;
        let (hit_ratio, _) = ratios(counters.hits, counters.misses);
        let enabled_levels = self.runtime.candidate_levels(None);

        let healthy = lookups < HEALTH_MIN_LOOKUPS || hit_ratio >= HEALTHY_HIT_RATIO;
        let message = if enabled_levels.is_empty() {
            "no cache level is enabled".to_string()
        } else if lookups < HEALTH_MIN_LOOKUPS {
            format!("warming up ({} lookups)", lookups)
        } else if healthy {
            format!("hit ratio {:.2}%", hit_ratio)
        } else {
            format!("hit ratio {:.2}% below {:.0}%", hit_ratio, HEALTHY_HIT_RATIO)
        };

        CacheHealth {
            healthy,
            hit_ratio,
            lookups,
            enabled_levels,
            message,
        }
    }

    pub fn reset(&self) {
        self.runtime.stats.reset();
        debug!("Cache statistics reset");
    }
}
