//! # Database Tier Maintenance
//!
//! Housekeeping of the persistent level through its [`StoreMaintenance`]
//! surface. Each requested operation runs on its own; a failure is counted
//! in the report and never stops the remaining operations.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Value};
use tiercache_store::{StoreMaintenance, StoreSnapshot};
use tracing::{info, warn};

use crate::error::{CacheError, Result};
use crate::level::CacheLevel;
use crate::runtime::CacheRuntime;

/// Operations run when none are requested
pub const DEFAULT_OPERATIONS: [&str; 2] = ["cleanup", "optimize"];

/// Databases above this size get a vacuum recommendation
const VACUUM_RECOMMENDATION_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceOperation {
    CleanupExpired,
    OptimizeTables,
    AnalyzeUsage,
    VacuumSpace,
    UpdateIndexes,
    ValidateIntegrity,
}

impl MaintenanceOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            MaintenanceOperation::CleanupExpired => "cleanup_expired",
            MaintenanceOperation::OptimizeTables => "optimize_tables",
            MaintenanceOperation::AnalyzeUsage => "analyze_usage",
            MaintenanceOperation::VacuumSpace => "vacuum_space",
            MaintenanceOperation::UpdateIndexes => "update_indexes",
            MaintenanceOperation::ValidateIntegrity => "validate_integrity",
        }
    }

    fn run(self, store: &dyn StoreMaintenance) -> tiercache_store::Result<Value> {
        Ok(match self {
            MaintenanceOperation::CleanupExpired => json!({ "removed": store.cleanup_expired()? }),
            MaintenanceOperation::OptimizeTables => {
                store.optimize()?;
                json!({ "optimized": true })
            }
            MaintenanceOperation::AnalyzeUsage => serde_json::to_value(store.analyze()?)?,
            MaintenanceOperation::VacuumSpace => json!({ "bytes_reclaimed": store.vacuum()? }),
            MaintenanceOperation::UpdateIndexes => {
                store.reindex()?;
                json!({ "reindexed": true })
            }
            MaintenanceOperation::ValidateIntegrity => {
                let ok = store.integrity_check()?;
                if !ok {
                    return Err(tiercache_store::StoreError::Database(
                        "integrity check reported problems".to_string(),
                    ));
                }
                json!({ "integrity": "ok" })
            }
        })
    }
}

impl fmt::Display for MaintenanceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaintenanceOperation {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cleanup" | "cleanup_expired" => Ok(MaintenanceOperation::CleanupExpired),
            "optimize" | "optimize_tables" => Ok(MaintenanceOperation::OptimizeTables),
            "analyze_usage" => Ok(MaintenanceOperation::AnalyzeUsage),
            "vacuum_space" => Ok(MaintenanceOperation::VacuumSpace),
            "update_indexes" => Ok(MaintenanceOperation::UpdateIndexes),
            "validate_integrity" => Ok(MaintenanceOperation::ValidateIntegrity),
            other => Err(CacheError::configuration(format!(
                "unknown maintenance operation '{}'",
                other
            ))),
        }
    }
}

/// Result of the default `cleanup` + `optimize` run
#[derive(Debug, Clone, Serialize)]
pub struct CompactMaintenanceReport {
    pub message: String,
    pub duration_ms: f64,
    pub operations: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub duration_ms: f64,
    /// Percentage, two decimals
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    pub operation: String,
    pub success: bool,
    pub duration_seconds: f64,
    pub detail: Value,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceStatistics {
    pub before: Option<StoreSnapshot>,
    pub after: Option<StoreSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailedMaintenanceReport {
    pub summary: MaintenanceSummary,
    pub operations: Vec<OperationOutcome>,
    pub statistics: MaintenanceStatistics,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MaintenanceReport {
    Compact(CompactMaintenanceReport),
    Detailed(DetailedMaintenanceReport),
}

impl MaintenanceReport {
    /// Whether every requested operation succeeded
    pub fn all_succeeded(&self) -> bool {
        match self {
            MaintenanceReport::Compact(report) => report.operations.values().all(|ok| *ok),
            MaintenanceReport::Detailed(report) => report.summary.failed == 0,
        }
    }
}

pub struct CacheMaintenanceService {
    runtime: Arc<CacheRuntime>,
}

impl CacheMaintenanceService {
    pub fn new(runtime: Arc<CacheRuntime>) -> Self {
        Self { runtime }
    }

    fn store(&self) -> Option<&dyn StoreMaintenance> {
        self.runtime
            .store(CacheLevel::Database)
            .and_then(|store| store.maintenance())
    }

    /// Run `operations` (default `cleanup` + `optimize`) against the database tier
    pub fn maintain(&self, operations: &[&str]) -> MaintenanceReport {
        let requested: Vec<&str> = if operations.is_empty() {
            DEFAULT_OPERATIONS.to_vec()
        } else {
            operations.to_vec()
        };

        let compact = requested.iter().all(|name| DEFAULT_OPERATIONS.contains(name));
        let started = Instant::now();
        let before = self.snapshot();
        let outcomes: Vec<OperationOutcome> = requested.iter().map(|name| self.run_one(name)).collect();
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let successful = outcomes.iter().filter(|o| o.success).count();
        info!(
            requested = outcomes.len(),
            successful,
            "Database cache maintenance finished"
        );

        if compact {
            let message = if successful == outcomes.len() {
                "Database cache maintenance completed".to_string()
            } else {
                format!("Database cache maintenance finished with {} failure(s)", outcomes.len() - successful)
            };
            return MaintenanceReport::Compact(CompactMaintenanceReport {
                message,
                duration_ms,
                operations: outcomes
                    .into_iter()
                    .map(|outcome| (outcome.operation, outcome.success))
                    .collect(),
            });
        }

        let after = self.snapshot();
        let total = outcomes.len();
        let recommendations = recommendations(&outcomes, after.as_ref());
        MaintenanceReport::Detailed(DetailedMaintenanceReport {
            summary: MaintenanceSummary {
                total,
                successful,
                failed: total - successful,
                duration_ms,
                success_rate: if total == 0 {
                    0.0
                } else {
                    (successful as f64 / total as f64 * 10_000.0).round() / 100.0
                },
            },
            operations: outcomes,
            statistics: MaintenanceStatistics { before, after },
            recommendations,
        })
    }

    fn run_one(&self, name: &str) -> OperationOutcome {
        let started = Instant::now();
        let result = name
            .parse::<MaintenanceOperation>()
            .and_then(|operation| {
                let store = self
                    .store()
                    .ok_or_else(|| CacheError::no_level("database tier has no maintenance support"))?;
                operation.run(store).map_err(CacheError::from)
            });

        let (success, detail) = match result {
            Ok(detail) => (true, detail),
            Err(e) => {
                warn!("Maintenance operation {} failed: {}", name, e);
                (false, json!({ "error": e.to_string() }))
            }
        };

        OperationOutcome {
            operation: name.to_string(),
            success,
            duration_seconds: started.elapsed().as_secs_f64(),
            detail,
        }
    }

    fn snapshot(&self) -> Option<StoreSnapshot> {
        let store = self.store()?;
        match store.snapshot() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Could not snapshot the database tier: {}", e);
                None
            }
        }
    }
}

fn recommendations(outcomes: &[OperationOutcome], after: Option<&StoreSnapshot>) -> Vec<String> {
    let mut recommendations = Vec::new();

    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.success)
        .map(|o| o.operation.as_str())
        .collect();
    if !failed.is_empty() {
        recommendations.push(format!("Investigate failed operations: {}", failed.join(", ")));
    }

    if let Some(snapshot) = after {
        if snapshot.expired_entries > 0 {
            recommendations.push(format!(
                "{} expired entries remain; schedule cleanup more often",
                snapshot.expired_entries
            ));
        }
        if snapshot.size_bytes > VACUUM_RECOMMENDATION_BYTES {
            recommendations.push("Database exceeds 100 MB; consider vacuum_space".to_string());
        }
        if snapshot.total_entries > 0 && snapshot.tagged_entries == 0 {
            recommendations.push("No tagged entries; tag-based invalidation will not reach this tier".to_string());
        }
    }

    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_aliases() {
        assert_eq!("cleanup".parse::<MaintenanceOperation>().unwrap(), MaintenanceOperation::CleanupExpired);
        assert_eq!("optimize".parse::<MaintenanceOperation>().unwrap(), MaintenanceOperation::OptimizeTables);
        assert_eq!(
            "validate_integrity".parse::<MaintenanceOperation>().unwrap(),
            MaintenanceOperation::ValidateIntegrity
        );
        assert!("defragment".parse::<MaintenanceOperation>().is_err());
    }

    #[test]
    fn test_recommendations_report_failures() {
        let outcomes = vec![OperationOutcome {
            operation: "vacuum_space".into(),
            success: false,
            duration_seconds: 0.0,
            detail: Value::Null,
        }];
        let snapshot = StoreSnapshot {
            total_entries: 10,
            expired_entries: 2,
            tagged_entries: 1,
            size_bytes: 0,
        };
        let recs = recommendations(&outcomes, Some(&snapshot));
        assert_eq!(recs.len(), 2);
        assert!(recs[0].contains("vacuum_space"));
    }
}
