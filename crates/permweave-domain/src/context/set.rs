//! Immutable multi-valued context sets.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{DomainError, DomainResult};

/// Context key naming the server a node applies on.
pub const SERVER_KEY: &str = "server";
/// Context key naming the world a node applies in.
pub const WORLD_KEY: &str = "world";
/// Server/world value meaning "everywhere"; normalised away on build.
pub const GLOBAL_VALUE: &str = "global";

/// How a context set filter is matched against the active contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContextSatisfyMode {
    /// Every key in the filter needs at least one of its values present.
    #[default]
    AtLeastOneValuePerKey,
    /// Every (key, value) pair in the filter must be present.
    AllValuesPerKey,
}

impl ContextSatisfyMode {
    /// Parses the configuration spelling (`at-least-one-value-per-key`, ...).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "at-least-one-value-per-key" => Some(Self::AtLeastOneValuePerKey),
            "all-values-per-key" => Some(Self::AllValuesPerKey),
            _ => None,
        }
    }
}

/// An immutable bag of `(key, value)` pairs.
///
/// A key may map to several values. Pairs are kept sorted and deduplicated,
/// so equality and hashing do not depend on insertion order. Keys and values
/// are lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ContextSet {
    pairs: Vec<(String, String)>,
}

impl ContextSet {
    /// The empty (global) context set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a builder.
    pub fn builder() -> ContextSetBuilder {
        ContextSetBuilder::default()
    }

    /// Creates a set holding a single pair.
    pub fn of(key: impl AsRef<str>, value: impl AsRef<str>) -> DomainResult<Self> {
        Self::builder().add(key, value).build()
    }

    /// Creates a set from an iterator of pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> DomainResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        pairs
            .into_iter()
            .fold(Self::builder(), |builder, (k, v)| builder.add(k, v))
            .build()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Number of pairs.
    pub fn size(&self) -> usize {
        self.pairs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Distinct keys, in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        let mut last: Option<&str> = None;
        self.pairs.iter().filter_map(move |(k, _)| {
            if last == Some(k.as_str()) {
                None
            } else {
                last = Some(k.as_str());
                last
            }
        })
    }

    /// All values recorded for `key`.
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.pairs
            .binary_search_by(|(k, v)| (k.as_str(), v.as_str()).cmp(&(key, value)))
            .is_ok()
    }

    /// Returns whether this set, used as a filter, is satisfied by `other`.
    ///
    /// The empty set is satisfied by anything.
    pub fn is_satisfied_by(&self, other: &ContextSet, mode: ContextSatisfyMode) -> bool {
        if self.is_empty() {
            return true;
        }
        match mode {
            ContextSatisfyMode::AllValuesPerKey => {
                self.size() <= other.size() && self.iter().all(|(k, v)| other.contains(k, v))
            }
            ContextSatisfyMode::AtLeastOneValuePerKey => self
                .keys()
                .all(|key| self.values(key).any(|value| other.contains(key, value))),
        }
    }

    /// Returns a set holding the pairs of both sets.
    pub fn union(&self, other: &ContextSet) -> ContextSet {
        let merged: BTreeSet<(String, String)> =
            self.pairs.iter().chain(other.pairs.iter()).cloned().collect();
        ContextSet {
            pairs: merged.into_iter().collect(),
        }
    }

    /// Orders sets by how specific they are: presence of a `server` key,
    /// then presence of a `world` key, then size, then pair order.
    ///
    /// `Ordering::Greater` means `self` is more specific than `other`.
    pub fn specificity_cmp(&self, other: &ContextSet) -> Ordering {
        if self == other {
            return Ordering::Equal;
        }
        self.contains_key(SERVER_KEY)
            .cmp(&other.contains_key(SERVER_KEY))
            .then_with(|| {
                self.contains_key(WORLD_KEY)
                    .cmp(&other.contains_key(WORLD_KEY))
            })
            .then_with(|| self.size().cmp(&other.size()))
            .then_with(|| other.pairs.cmp(&self.pairs))
    }

    /// Starts a builder pre-populated with this set's pairs.
    pub fn to_builder(&self) -> ContextSetBuilder {
        ContextSetBuilder {
            pairs: self.pairs.iter().cloned().collect(),
            error: None,
        }
    }
}

impl fmt::Display for ContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(global)");
        }
        write!(f, "{{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "}}")
    }
}

/// Builder for [`ContextSet`].
///
/// Invalid pairs are remembered and reported by [`ContextSetBuilder::build`].
#[derive(Debug, Default, Clone)]
pub struct ContextSetBuilder {
    pairs: BTreeSet<(String, String)>,
    error: Option<String>,
}

impl ContextSetBuilder {
    /// Adds a pair. `server=global` and `world=global` are dropped.
    pub fn add(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let key = key.as_ref().trim().to_lowercase();
        let value = value.as_ref().trim().to_lowercase();

        if key.is_empty() || value.is_empty() {
            if self.error.is_none() {
                self.error = Some(format!("context pair '{key}={value}' has an empty part"));
            }
            return self;
        }
        if (key == SERVER_KEY || key == WORLD_KEY) && value == GLOBAL_VALUE {
            return self;
        }

        self.pairs.insert((key, value));
        self
    }

    /// Adds every pair of another set.
    pub fn add_all(mut self, other: &ContextSet) -> Self {
        self.pairs.extend(other.pairs.iter().cloned());
        self
    }

    pub fn build(self) -> DomainResult<ContextSet> {
        if let Some(message) = self.error {
            return Err(DomainError::InvalidContext { message });
        }
        Ok(ContextSet {
            pairs: self.pairs.into_iter().collect(),
        })
    }
}
