//! # Cache Keys
//!
//! Canonical identity of a cached value: `prefix:namespace:key`.
//!
//! ```rust
//! use tiercache_core::key::CacheKey;
//!
//! let key = CacheKey::new("ip:203.0.113.7")
//!     .with_namespace("reputation")
//!     .with_tag("ip")
//!     .with_ttl(900);
//!
//! assert_eq!(key.canonical(), "cache:reputation:ip:203.0.113.7");
//! assert!(key.validate().is_valid());
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default key prefix
pub const DEFAULT_PREFIX: &str = "cache";

/// Default namespace
pub const DEFAULT_NAMESPACE: &str = "default";

/// Maximum key length in characters
pub const MAX_KEY_LENGTH: usize = 255;

/// TTLs above one year are rejected by validation
pub const MAX_REASONABLE_TTL: i64 = 31_536_000;

/// Tags marking a key as time-based
const TIME_TAGS: [&str; 6] = ["minutely", "hourly", "daily", "weekly", "monthly", "yearly"];

fn key_charset() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-.:@/]+$").expect("static regex"))
}

fn namespace_charset() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-.]+$").expect("static regex"))
}

fn version_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":v\d+(\.\d+)*$").expect("static regex"))
}

/// A single validation problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationError {
    KeyRequired,
    KeyTooLong,
    KeyInvalidCharacters,
    NamespaceRequired,
    NamespaceInvalidCharacters,
    PrefixInvalidCharacters,
    TtlUnreasonable,
}

impl ValidationError {
    pub fn code(self) -> &'static str {
        match self {
            ValidationError::KeyRequired => "key_required",
            ValidationError::KeyTooLong => "key_too_long",
            ValidationError::KeyInvalidCharacters => "key_invalid_characters",
            ValidationError::NamespaceRequired => "namespace_required",
            ValidationError::NamespaceInvalidCharacters => "namespace_invalid_characters",
            ValidationError::PrefixInvalidCharacters => "prefix_invalid_characters",
            ValidationError::TtlUnreasonable => "ttl_unreasonable",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Field -> problem map produced by [`CacheKey::validate`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    errors: BTreeMap<&'static str, ValidationError>,
}

impl ValidationReport {
    fn reject(&mut self, field: &'static str, error: ValidationError) {
        self.errors.entry(field).or_insert(error);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &BTreeMap<&'static str, ValidationError> {
        &self.errors
    }

    /// Whether any field reported `code`
    pub fn has(&self, code: &str) -> bool {
        self.errors.values().any(|e| e.code() == code)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|(field, error)| format!("{}: {}", field, error))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

/// Immutable cache key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
    key: String,
    namespace: String,
    prefix: String,
    tags: BTreeSet<String>,
    ttl: Option<i64>,
    context: BTreeMap<String, Value>,
}

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            tags: BTreeSet::new(),
            ttl: None,
            context: BTreeMap::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// TTL override in seconds
    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_context(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn ttl(&self) -> Option<i64> {
        self.ttl
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    /// `prefix:namespace:key`
    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", self.prefix, self.namespace, self.key)
    }

    /// Non-empty segments of the key split on `:`, `.` and `/`
    pub fn segments(&self) -> Vec<&str> {
        self.key
            .split(|c| c == ':' || c == '.' || c == '/')
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn is_hierarchical(&self) -> bool {
        self.segments().len() >= 2
    }

    /// Ends with `:vX` or `:vX.Y`
    pub fn is_versioned(&self) -> bool {
        version_suffix().is_match(&self.key)
    }

    /// Version suffix without the leading `:v`
    pub fn version(&self) -> Option<&str> {
        version_suffix()
            .find(&self.key)
            .map(|m| &self.key[m.start() + 2..m.end()])
    }

    pub fn is_time_based(&self) -> bool {
        self.context.contains_key("time_unit")
            || self.tags.iter().any(|tag| TIME_TAGS.contains(&tag.as_str()))
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.key.is_empty() {
            report.reject("key", ValidationError::KeyRequired);
        } else if self.key.chars().count() > MAX_KEY_LENGTH {
            report.reject("key", ValidationError::KeyTooLong);
        } else if !key_charset().is_match(&self.key) {
            report.reject("key", ValidationError::KeyInvalidCharacters);
        }

        if self.namespace.is_empty() {
            report.reject("namespace", ValidationError::NamespaceRequired);
        } else if !namespace_charset().is_match(&self.namespace) {
            report.reject("namespace", ValidationError::NamespaceInvalidCharacters);
        }

        if !self.prefix.is_empty() && !namespace_charset().is_match(&self.prefix) {
            report.reject("prefix", ValidationError::PrefixInvalidCharacters);
        }

        if matches!(self.ttl, Some(ttl) if ttl > MAX_REASONABLE_TTL) {
            report.reject("ttl", ValidationError::TtlUnreasonable);
        }

        report
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_valid()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        CacheKey::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        CacheKey::new(key)
    }
}

impl From<&CacheKey> for CacheKey {
    fn from(key: &CacheKey) -> Self {
        key.clone()
    }
}
