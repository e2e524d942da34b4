//! # Cache Warming
//!
//! Pre-populates the cache from producer callbacks in fixed-size batches.
//! Each warmer is isolated: an error or a panic in one producer is recorded
//! against that warmer and the run continues.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::operation::CacheOperationService;
use crate::key::CacheKey;
use crate::level::{CacheLevel, TtlRequest};
use crate::runtime::CacheRuntime;

/// Strategy names registered on construction
pub const BUILTIN_STRATEGIES: [(&str, &str); 5] = [
    ("frequent_data", "Frequently accessed lookups"),
    ("critical_data", "Data the application cannot serve without"),
    ("analytics_data", "Aggregates and reporting data"),
    ("configuration_data", "Configuration values"),
    ("security_data", "Reputation and blocklist data"),
];

/// Value producer; `Ok(None)` skips the warmer
pub type Producer = Arc<dyn Fn() -> anyhow::Result<Option<Value>> + Send + Sync>;

/// One key to pre-populate
#[derive(Clone)]
pub struct Warmer {
    key: CacheKey,
    ttl: Option<i64>,
    producer: Producer,
}

impl Warmer {
    pub fn new<K, F>(key: K, producer: F) -> Self
    where
        K: Into<CacheKey>,
        F: Fn() -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            ttl: None,
            producer: Arc::new(producer),
        }
    }

    /// Warmer for a value that is already known
    pub fn with_value(key: impl Into<CacheKey>, value: Value) -> Self {
        Self::new(key, move || Ok(Some(value.clone())))
    }

    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub(crate) fn resolve_key(mut self, runtime: &CacheRuntime) -> Self {
        self.key = runtime.resolve_key(self.key);
        self
    }
}

impl fmt::Debug for Warmer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Warmer")
            .field("key", &self.key.canonical())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmStatus {
    Successful,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmerResult {
    pub key: String,
    pub status: WarmStatus,
    pub error: Option<String>,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WarmingSummary {
    pub total: usize,
    pub successful: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchPerformance {
    pub batch: usize,
    pub items: usize,
    pub duration_ms: f64,
    pub items_per_second: f64,
    pub memory_delta_bytes: i64,
    /// The batch ran longer than the configured soft budget
    pub over_budget: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmingReport {
    pub summary: WarmingSummary,
    pub results: Vec<WarmerResult>,
    pub errors: Vec<String>,
    pub batches: Vec<BatchPerformance>,
}

/// Counters across `warm_cache` runs
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmingRunStats {
    pub total_warmed: u64,
    pub successful: u64,
    pub failed: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyInfo {
    pub name: String,
    pub description: String,
    pub warmers: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategyRunReport {
    pub strategies: BTreeMap<String, WarmingReport>,
    pub unknown: Vec<String>,
    pub stats: WarmingRunStats,
}

struct WarmingStrategy {
    description: String,
    warmers: Vec<Warmer>,
}

pub struct CacheWarmingService {
    runtime: Arc<CacheRuntime>,
    operations: Arc<CacheOperationService>,
    strategies: RwLock<BTreeMap<String, WarmingStrategy>>,
    run_stats: RwLock<WarmingRunStats>,
}

impl CacheWarmingService {
    pub fn new(runtime: Arc<CacheRuntime>, operations: Arc<CacheOperationService>) -> Self {
        let strategies = BUILTIN_STRATEGIES
            .iter()
            .map(|(name, description)| {
                (
                    name.to_string(),
                    WarmingStrategy {
                        description: description.to_string(),
                        warmers: Vec::new(),
                    },
                )
            })
            .collect();

        Self {
            runtime,
            operations,
            strategies: RwLock::new(strategies),
            run_stats: RwLock::new(WarmingRunStats::default()),
        }
    }

    /// Produce and store every warmer, batch by batch
    pub fn warm(&self, warmers: &[Warmer], levels: Option<&[CacheLevel]>) -> WarmingReport {
        let config = self.runtime.config().warming;
        let budget = Duration::from_millis(config.batch_time_budget_ms);
        let started = Instant::now();
        let mut report = WarmingReport::default();

        for (index, batch) in warmers.chunks(config.batch_size.max(1)).enumerate() {
            let batch_started = Instant::now();
            let memory_before = self.runtime.current_memory();

            for warmer in batch {
                let result = self.warm_one(warmer, levels);
                match result.status {
                    WarmStatus::Successful => report.summary.successful += 1,
                    WarmStatus::Skipped => report.summary.skipped += 1,
                    WarmStatus::Failed => {
                        report.summary.failed += 1;
                        if let Some(error) = &result.error {
                            report.errors.push(format!("{}: {}", result.key, error));
                        }
                    }
                }
                report.results.push(result);
            }

            let elapsed = batch_started.elapsed();
            let memory_delta = match (memory_before, self.runtime.current_memory()) {
                (Some(before), Some(after)) => after as i64 - before as i64,
                _ => 0,
            };
            let over_budget = elapsed > budget;
            if over_budget {
                warn!(
                    "Warming batch {} took {:?}, over the {:?} budget",
                    index, elapsed, budget
                );
            }

            let seconds = elapsed.as_secs_f64();
            report.batches.push(BatchPerformance {
                batch: index,
                items: batch.len(),
                duration_ms: seconds * 1000.0,
                items_per_second: if seconds > 0.0 { batch.len() as f64 / seconds } else { batch.len() as f64 },
                memory_delta_bytes: memory_delta,
                over_budget,
            });
        }

        report.summary.total = warmers.len();
        report.summary.duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        info!(
            total = report.summary.total,
            successful = report.summary.successful,
            skipped = report.summary.skipped,
            failed = report.summary.failed,
            "Cache warming finished"
        );
        report
    }

    fn warm_one(&self, warmer: &Warmer, levels: Option<&[CacheLevel]>) -> WarmerResult {
        let started = Instant::now();
        let key = warmer.key.canonical();
        let producer = Arc::clone(&warmer.producer);

        let (status, error) = match catch_unwind(AssertUnwindSafe(|| producer())) {
            Ok(Ok(Some(value))) if !value.is_null() => {
                let ttl = TtlRequest::from(warmer.ttl);
                if self.operations.put(&warmer.key, &value, ttl, levels) {
                    (WarmStatus::Successful, None)
                } else {
                    (WarmStatus::Failed, Some("cache write failed".to_string()))
                }
            }
            Ok(Ok(_)) => (WarmStatus::Skipped, None),
            Ok(Err(e)) => (WarmStatus::Failed, Some(format!("{:#}", e))),
            Err(panic) => (WarmStatus::Failed, Some(format!("producer panicked: {}", panic_message(panic.as_ref())))),
        };

        if let Some(error) = &error {
            warn!("Warming {} failed: {}", key, error);
        }

        WarmerResult {
            key,
            status,
            error,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Register or replace a named strategy
    pub fn register_strategy(&self, name: &str, description: &str, warmers: Vec<Warmer>) {
        self.strategies.write().insert(
            name.to_string(),
            WarmingStrategy {
                description: description.to_string(),
                warmers,
            },
        );
    }

    /// Append to an existing strategy; `false` when it is unknown
    pub fn add_warmer(&self, strategy: &str, warmer: Warmer) -> bool {
        match self.strategies.write().get_mut(strategy) {
            Some(strategy) => {
                strategy.warmers.push(warmer);
                true
            }
            None => false,
        }
    }

    pub fn strategies(&self) -> Vec<StrategyInfo> {
        self.strategies
            .read()
            .iter()
            .map(|(name, strategy)| StrategyInfo {
                name: name.clone(),
                description: strategy.description.clone(),
                warmers: strategy.warmers.len(),
            })
            .collect()
    }

    /// Run the named strategies, or all of them
    pub fn warm_cache(&self, names: Option<&[&str]>) -> StrategyRunReport {
        let started = Instant::now();
        let selected: Vec<(String, Option<Vec<Warmer>>)> = {
            let strategies = self.strategies.read();
            match names {
                Some(names) => names
                    .iter()
                    .map(|name| {
                        let warmers = strategies.get(*name).map(|s| s.warmers.clone());
                        (name.to_string(), warmers)
                    })
                    .collect(),
                None => strategies
                    .iter()
                    .map(|(name, s)| (name.clone(), Some(s.warmers.clone())))
                    .collect(),
            }
        };

        let mut run = StrategyRunReport::default();
        for (name, warmers) in selected {
            match warmers {
                Some(warmers) => {
                    let report = self.warm(&warmers, None);
                    run.strategies.insert(name, report);
                }
                None => {
                    warn!("Unknown warming strategy '{}'", name);
                    run.unknown.push(name);
                }
            }
        }

        let mut stats = self.run_stats.write();
        for report in run.strategies.values() {
            stats.total_warmed += report.summary.total as u64;
            stats.successful += report.summary.successful as u64;
            stats.failed += report.summary.failed as u64;
        }
        stats.last_run = Some(Utc::now());
        stats.last_duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        run.stats = stats.clone();
        run
    }

    pub fn warming_stats(&self) -> WarmingRunStats {
        self.run_stats.read().clone()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
