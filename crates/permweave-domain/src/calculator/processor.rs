//! Permission processors.
//!
//! A processor answers a query the flattened map does not contain directly.
//! Processors are asked in order and the first defined answer wins, except
//! that a processor which overrides wildcards may replace an answer that came
//! from a wildcard processor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use moka::sync::Cache;
use parking_lot::RwLock;
use regex::Regex;
use tracing::debug;

use super::defaults::PlatformDefaultsProvider;
use super::regex_cache::RegexCache;
use super::tristate::Tristate;
use crate::node::is_regex_key;

/// Flattened `permission → value` map a calculator is built over.
pub type PermissionMap = HashMap<String, bool>;

const WILDCARD_SUFFIX: &str = ".*";
const ROOT_WILDCARD: &str = "*";
const ROOT_WILDCARD_QUOTED: &str = "'*'";

/// Identifies a processor implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    /// Exact lookup in the flattened map. Always first.
    Direct,
    /// `a.b.*` and root `*` wildcards.
    Wildcard,
    /// Implicit parent wildcards: `a` grants `a.b`.
    SpongeWildcard,
    /// `r=`/`R=` pattern keys.
    Regex,
    /// The hosting platform's default permissions.
    Defaults,
}

impl ProcessorKind {
    /// Parses the configuration spelling (`wildcard`, `sponge-wildcard`,
    /// `regex`, `defaults`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "direct" => Some(Self::Direct),
            "wildcard" => Some(Self::Wildcard),
            "sponge-wildcard" => Some(Self::SpongeWildcard),
            "regex" => Some(Self::Regex),
            "defaults" | "platform-defaults" => Some(Self::Defaults),
            _ => None,
        }
    }

    pub fn is_wildcard(self) -> bool {
        matches!(self, ProcessorKind::Wildcard | ProcessorKind::SpongeWildcard)
    }
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessorKind::Direct => "direct",
            ProcessorKind::Wildcard => "wildcard",
            ProcessorKind::SpongeWildcard => "sponge-wildcard",
            ProcessorKind::Regex => "regex",
            ProcessorKind::Defaults => "defaults",
        };
        f.write_str(name)
    }
}

/// A pluggable permission lookup strategy.
pub trait PermissionProcessor: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProcessorKind;

    /// Looks up an already lower-cased permission.
    fn has_permission(&self, permission: &str) -> Tristate;

    /// Whether this processor may replace an answer produced by a wildcard
    /// processor earlier in the chain.
    fn overrides_wildcards(&self) -> bool {
        false
    }

    /// Clears any internal memoisation. The source map is kept.
    fn invalidate(&self) {}
}

/// Iterates the dotted parents of a permission, nearest first:
/// `a.b.c` yields `a.b`, then `a`.
fn parents(permission: &str) -> impl Iterator<Item = &str> {
    let mut current = permission;
    std::iter::from_fn(move || {
        let idx = current.rfind('.')?;
        current = &current[..idx];
        Some(current)
    })
}

// ------------------------------------------------------------
// Direct
// ------------------------------------------------------------

#[derive(Debug)]
pub struct DirectProcessor {
    source: Arc<PermissionMap>,
}

impl DirectProcessor {
    pub fn new(source: Arc<PermissionMap>) -> Self {
        Self { source }
    }
}

impl PermissionProcessor for DirectProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Direct
    }

    fn has_permission(&self, permission: &str) -> Tristate {
        self.source
            .get(permission)
            .map_or(Tristate::Undefined, |value| Tristate::from_bool(*value))
    }
}

// ------------------------------------------------------------
// Wildcard
// ------------------------------------------------------------

/// Resolves `a.b.*` style nodes, most specific parent first, then the root
/// wildcard.
#[derive(Debug)]
pub struct WildcardProcessor {
    /// Wildcard prefixes without the trailing `.*`.
    wildcards: HashMap<String, bool>,
    root: Option<bool>,
}

impl WildcardProcessor {
    pub fn new(source: &PermissionMap) -> Self {
        let wildcards = source
            .iter()
            .filter_map(|(key, value)| {
                let prefix = key.strip_suffix(WILDCARD_SUFFIX)?;
                (!prefix.is_empty()).then(|| (prefix.to_string(), *value))
            })
            .collect();
        // `*` takes precedence over `'*'`.
        let root = source
            .get(ROOT_WILDCARD)
            .or_else(|| source.get(ROOT_WILDCARD_QUOTED))
            .copied();
        Self { wildcards, root }
    }
}

impl PermissionProcessor for WildcardProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Wildcard
    }

    fn has_permission(&self, permission: &str) -> Tristate {
        parents(permission)
            .find_map(|parent| self.wildcards.get(parent))
            .or(self.root.as_ref())
            .map_or(Tristate::Undefined, |value| Tristate::from_bool(*value))
    }
}

// ------------------------------------------------------------
// Sponge-style implicit wildcard
// ------------------------------------------------------------

/// Treats a granted node as granting all of its children.
#[derive(Debug)]
pub struct SpongeWildcardProcessor {
    source: Arc<PermissionMap>,
}

impl SpongeWildcardProcessor {
    pub fn new(source: Arc<PermissionMap>) -> Self {
        Self { source }
    }
}

impl PermissionProcessor for SpongeWildcardProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::SpongeWildcard
    }

    fn has_permission(&self, permission: &str) -> Tristate {
        parents(permission)
            .find_map(|parent| self.source.get(parent))
            .map_or(Tristate::Undefined, |value| Tristate::from_bool(*value))
    }
}

// ------------------------------------------------------------
// Regex
// ------------------------------------------------------------

/// Matches the query against every `r=` node; the first full match wins.
///
/// Patterns are compiled through the shared cache on first use and dropped
/// again by [`PermissionProcessor::invalidate`].
#[derive(Debug)]
pub struct RegexProcessor {
    sources: Vec<(String, bool)>,
    cache: Arc<RegexCache>,
    compiled: RwLock<Option<Arc<[(Arc<Regex>, bool)]>>>,
}

impl RegexProcessor {
    pub fn new(source: &PermissionMap, cache: Arc<RegexCache>) -> Self {
        let mut sources: Vec<(String, bool)> = source
            .iter()
            .filter(|(key, _)| is_regex_key(key))
            .map(|(key, value)| (key[2..].to_string(), *value))
            .collect();
        sources.sort();
        Self {
            sources,
            cache,
            compiled: RwLock::new(None),
        }
    }

    /// Compiled patterns in key order. Invalid patterns are skipped.
    fn patterns(&self) -> Arc<[(Arc<Regex>, bool)]> {
        if let Some(patterns) = self.compiled.read().as_ref() {
            return Arc::clone(patterns);
        }

        let patterns: Arc<[(Arc<Regex>, bool)]> = self
            .sources
            .iter()
            .filter_map(|(pattern, value)| match self.cache.get_or_compile(pattern) {
                Ok(regex) => Some((regex, *value)),
                Err(error) => {
                    debug!(%pattern, %error, "skipping invalid regex permission");
                    None
                }
            })
            .collect();
        *self.compiled.write() = Some(Arc::clone(&patterns));
        patterns
    }

    #[cfg(test)]
    fn is_compiled(&self) -> bool {
        self.compiled.read().is_some()
    }
}

impl PermissionProcessor for RegexProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Regex
    }

    fn has_permission(&self, permission: &str) -> Tristate {
        self.patterns()
            .iter()
            .find(|(regex, _)| regex.is_match(permission))
            .map_or(Tristate::Undefined, |(_, value)| Tristate::from_bool(*value))
    }

    fn invalidate(&self) {
        *self.compiled.write() = None;
    }
}

// ------------------------------------------------------------
// Platform defaults
// ------------------------------------------------------------

/// Consults the platform's default permissions, memoising up to
/// `memo_capacity` answers until invalidated.
pub struct DefaultsProcessor {
    provider: Arc<dyn PlatformDefaultsProvider>,
    operator: bool,
    override_wildcards: bool,
    answers: Cache<String, Tristate>,
}

impl fmt::Debug for DefaultsProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultsProcessor")
            .field("operator", &self.operator)
            .field("override_wildcards", &self.override_wildcards)
            .field("memoised", &self.answers.entry_count())
            .finish()
    }
}

impl DefaultsProcessor {
    pub fn new(
        provider: Arc<dyn PlatformDefaultsProvider>,
        operator: bool,
        override_wildcards: bool,
        memo_capacity: u64,
    ) -> Self {
        Self {
            provider,
            operator,
            override_wildcards,
            answers: Cache::new(memo_capacity),
        }
    }
}

impl PermissionProcessor for DefaultsProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Defaults
    }

    fn has_permission(&self, permission: &str) -> Tristate {
        if let Some(answer) = self.answers.get(permission) {
            return answer;
        }
        let answer = self.provider.default_value(permission, self.operator);
        self.answers.insert(permission.to_string(), answer);
        answer
    }

    fn overrides_wildcards(&self) -> bool {
        self.override_wildcards
    }

    fn invalidate(&self) {
        self.answers.invalidate_all();
    }
}
