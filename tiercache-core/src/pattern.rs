//! Glob matching over canonical identifiers.
//!
//! `*` matches any run of characters (including none); every other
//! character is literal. Patterns are anchored on the whole identifier, so
//! `*user:123:*` finds the fragment anywhere while `cache:geo:*` only
//! matches identifiers starting with `cache:geo:`.

use regex::Regex;

use crate::error::{CacheError, Result};

#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(glob: &str) -> Result<Self> {
        if glob.is_empty() {
            return Err(CacheError::invalid_key("empty invalidation pattern"));
        }

        let body = glob
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{}$", body))
            .map_err(|e| CacheError::invalid_key(format!("pattern '{}': {}", glob, e)))?;

        Ok(Self {
            source: glob.to_string(),
            regex,
        })
    }

    /// Pattern removing every identifier containing `fragment`
    pub fn containing(fragment: &str) -> Result<Self> {
        Self::new(&format!("*{}*", fragment))
    }

    pub fn matches(&self, identifier: &str) -> bool {
        self.regex.is_match(identifier)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}
