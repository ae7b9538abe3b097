//! Compiled pattern cache for regex permissions.
//!
//! Compiling a pattern is far more expensive than matching it, and the same
//! `r=` nodes usually appear in the flattened maps of many holders, so the
//! compiled form is shared across every calculator built by one factory.
//!
//! # Thread Safety
//!
//! The cache uses DashMap for lock-free concurrent access.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use regex::{Regex, RegexBuilder};

use crate::error::{DomainError, DomainResult};

/// Thread-safe cache of compiled, fully anchored, case-insensitive patterns
/// keyed by source.
#[derive(Debug, Default)]
pub struct RegexCache {
    cache: DashMap<String, Arc<Regex>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a compiled pattern or compiles and caches it.
    ///
    /// The pattern must match the whole permission string. Invalid patterns
    /// are reported and never cached.
    pub fn get_or_compile(&self, pattern: &str) -> DomainResult<Arc<Regex>> {
        if let Some(cached) = self.cache.get(pattern) {
            return Ok(Arc::clone(cached.value()));
        }

        match self.cache.entry(pattern.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                // Queries are lower-cased before lookup.
                let compiled = RegexBuilder::new(&format!("^(?:{pattern})$"))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| DomainError::InvalidPermission {
                        value: format!("{pattern}: {e}"),
                    })?;
                let compiled = Arc::new(compiled);
                entry.insert(Arc::clone(&compiled));
                Ok(compiled)
            }
        }
    }

    pub fn entry_count(&self) -> usize {
        self.cache.len()
    }

    pub fn invalidate_all(&self) {
        self.cache.clear();
    }
}
