//! # Cache Invalidation
//!
//! Removal by key, tag, glob pattern or namespace. Invalidating a key or a
//! namespace also removes, one hop deep, every identifier mentioning a
//! registered dependent of that namespace. Cascades never call back into
//! `invalidate`, so cycles in the dependency graph are harmless.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::operation::CacheOperationService;
use crate::key::CacheKey;
use crate::level::CacheLevel;
use crate::pattern::GlobPattern;
use crate::runtime::CacheRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationKind {
    Key,
    Tags,
    Pattern,
    Namespace,
}

/// Emitted once per direct invalidation call
#[derive(Debug, Clone, Serialize)]
pub struct InvalidationEvent {
    pub kind: InvalidationKind,
    /// Canonical key, joined tags, pattern or namespace
    pub target: String,
    pub levels: Vec<CacheLevel>,
    pub success: bool,
    /// Entries removed by the direct call, when countable
    pub removed: usize,
    /// Dependent patterns issued
    pub cascades: usize,
}

pub trait InvalidationListener: Send + Sync {
    fn on_invalidation(&self, event: &InvalidationEvent);
}

pub struct CacheInvalidationService {
    runtime: Arc<CacheRuntime>,
    operations: Arc<CacheOperationService>,
    listeners: RwLock<Vec<Arc<dyn InvalidationListener>>>,
}

impl CacheInvalidationService {
    pub fn new(runtime: Arc<CacheRuntime>, operations: Arc<CacheOperationService>) -> Self {
        Self {
            runtime,
            operations,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn InvalidationListener>) {
        self.listeners.write().push(listener);
    }

    fn notify(&self, event: InvalidationEvent) {
        info!(
            kind = ?event.kind,
            target = %event.target,
            removed = event.removed,
            cascades = event.cascades,
            "Cache invalidated"
        );
        for listener in self.listeners.read().iter() {
            listener.on_invalidation(&event);
        }
    }

    /// Forget `key`, then cascade to the dependents of its namespace
    pub fn invalidate(&self, key: &CacheKey, levels: Option<&[CacheLevel]>) -> bool {
        self.runtime.stats.record_invalidation();

        let success = self.operations.forget(key, levels);
        let cascades = if success {
            self.cascade(key.namespace(), levels)
        } else {
            0
        };

        self.notify(InvalidationEvent {
            kind: InvalidationKind::Key,
            target: key.canonical(),
            levels: self.runtime.candidate_levels(levels),
            success,
            removed: usize::from(success),
            cascades,
        });
        success
    }

    /// Remove every entry carrying any of `tags` from tag-capable levels
    pub fn invalidate_by_tags(&self, tags: &[String], levels: Option<&[CacheLevel]>) -> bool {
        self.runtime.stats.record_invalidation();

        let targets: Vec<CacheLevel> = self
            .runtime
            .candidate_levels(levels)
            .into_iter()
            .filter(|&level| self.runtime.spec(level).supports_tagging)
            .collect();

        let mut success = false;
        let mut removed = 0;
        for &level in &targets {
            let Some(store) = self.runtime.store(level) else {
                continue;
            };
            match store.forget_tagged(tags) {
                Ok(count) => {
                    success = true;
                    removed += count;
                }
                Err(e) if e.is_unsupported() => {
                    debug!("{} declares tagging but its adapter cannot remove by tag", level)
                }
                Err(e) => warn!("Tag invalidation failed at {}: {}", level, e),
            }
        }

        if targets.is_empty() {
            debug!("No tag-capable level among the targets");
        }

        self.notify(InvalidationEvent {
            kind: InvalidationKind::Tags,
            target: tags.join(","),
            levels: targets,
            success,
            removed,
            cascades: 0,
        });
        success
    }

    /// Remove every entry whose canonical identifier matches `glob`
    pub fn invalidate_by_pattern(&self, glob: &str, levels: Option<&[CacheLevel]>) -> usize {
        self.runtime.stats.record_invalidation();

        let removed = match GlobPattern::new(glob) {
            Ok(pattern) => self.remove_matching(&pattern, levels),
            Err(e) => {
                warn!("Skipping invalidation: {}", e);
                0
            }
        };
        self.notify(InvalidationEvent {
            kind: InvalidationKind::Pattern,
            target: glob.to_string(),
            levels: self.runtime.candidate_levels(levels),
            success: removed > 0,
            removed,
            cascades: 0,
        });
        removed
    }

    /// Remove `prefix:namespace:*` plus the dependents of `namespace`
    pub fn invalidate_by_namespace(&self, namespace: &str, levels: Option<&[CacheLevel]>) -> usize {
        self.runtime.stats.record_invalidation();

        let glob = format!("{}:{}:*", self.runtime.key_prefix(), namespace);
        let removed = match GlobPattern::new(&glob) {
            Ok(pattern) => self.remove_matching(&pattern, levels),
            Err(e) => {
                warn!("Skipping namespace invalidation: {}", e);
                0
            }
        };
        let cascades = self.cascade(namespace, levels);

        self.notify(InvalidationEvent {
            kind: InvalidationKind::Namespace,
            target: namespace.to_string(),
            levels: self.runtime.candidate_levels(levels),
            success: removed > 0,
            removed,
            cascades,
        });
        removed
    }

    /// One pattern removal per direct dependent of `source`
    fn cascade(&self, source: &str, levels: Option<&[CacheLevel]>) -> usize {
        let dependents = self.runtime.dependencies.dependents(source);
        for dependent in &dependents {
            self.runtime.stats.record_cascade();
            match GlobPattern::containing(dependent) {
                Ok(pattern) => {
                    let removed = self.remove_matching(&pattern, levels);
                    debug!("Cascade from {} via {} removed {} entries", source, pattern.as_str(), removed);
                }
                Err(e) => warn!("Skipping cascade from {} to {}: {}", source, dependent, e),
            }
        }
        dependents.len()
    }

    fn remove_matching(&self, pattern: &GlobPattern, levels: Option<&[CacheLevel]>) -> usize {
        let mut removed = 0;
        for level in self.runtime.candidate_levels(levels) {
            let Some(store) = self.runtime.store(level) else {
                continue;
            };
            let keys = match store.keys() {
                Ok(keys) => keys,
                Err(e) if e.is_unsupported() => {
                    debug!("{} cannot list identifiers, skipped for {}", level, pattern.as_str());
                    continue;
                }
                Err(e) => {
                    warn!("Key scan failed at {}: {}", level, e);
                    continue;
                }
            };

            for key in keys.iter().filter(|key| pattern.matches(key)) {
                match store.forget(key) {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => warn!("Could not remove {} at {}: {}", key, level, e),
                }
            }
        }
        removed
    }

    pub fn add_dependency(&self, source: &str, dependent: &str) {
        self.runtime.dependencies.add(source, dependent);
    }

    pub fn remove_dependency(&self, source: &str, dependent: &str) -> bool {
        self.runtime.dependencies.remove(source, dependent)
    }
}
