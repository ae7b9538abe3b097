//! Completed meta lookups.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::accumulator::{ChatMetaMap, MetaAccumulator, MetaMultimap};
use super::definition::MetaStackDefinition;
use crate::context::MetaContexts;
use crate::error::{DomainError, DomainResult};

/// Picks one value when a meta key has several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MetaValueSelector {
    /// The first accumulated value, i.e. the nearest holder's.
    #[default]
    First,
    /// The numerically largest value; non-numeric values are ignored.
    HighestNumber,
    /// The numerically smallest value; non-numeric values are ignored.
    LowestNumber,
}

impl MetaValueSelector {
    pub fn parse(value: &str) -> DomainResult<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "first" => Ok(Self::First),
            "highest-number" => Ok(Self::HighestNumber),
            "lowest-number" => Ok(Self::LowestNumber),
            _ => Err(DomainError::InvalidArgument {
                message: format!("unknown meta value selector: {value}"),
            }),
        }
    }

    /// Selects a value. Falls back to the first value when no value parses
    /// as a number.
    pub fn select<'a>(&self, values: &'a [String]) -> Option<&'a str> {
        let numeric = move || {
            values
                .iter()
                .filter_map(|v| v.trim().parse::<f64>().ok().map(|n| (n, v)))
        };
        let picked = match self {
            MetaValueSelector::First => None,
            MetaValueSelector::HighestNumber => numeric()
                .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal))
                .map(|(_, v)| v),
            MetaValueSelector::LowestNumber => numeric()
                .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal))
                .map(|(_, v)| v),
        };
        picked.or_else(|| values.first()).map(String::as_str)
    }
}

/// Meta resolved for one holder under one [`MetaContexts`].
#[derive(Debug, Clone)]
pub struct MetaData {
    contexts: MetaContexts,
    selector: MetaValueSelector,
    prefix: Option<String>,
    suffix: Option<String>,
    prefixes: ChatMetaMap,
    suffixes: ChatMetaMap,
    meta: MetaMultimap,
    weight: i32,
    primary_group: Option<String>,
}

impl MetaData {
    /// Takes the results of a completed accumulator.
    pub fn from_accumulator(
        contexts: MetaContexts,
        accumulator: &MetaAccumulator,
        selector: MetaValueSelector,
    ) -> DomainResult<Self> {
        Ok(Self {
            prefix: accumulator.prefix()?,
            suffix: accumulator.suffix()?,
            prefixes: accumulator.prefixes()?.clone(),
            suffixes: accumulator.suffixes()?.clone(),
            meta: accumulator.meta()?.clone(),
            weight: accumulator.weight()?,
            primary_group: accumulator.primary_group()?.map(str::to_string),
            contexts,
            selector,
        })
    }

    /// Data with no meta, served when computation fails.
    pub fn empty(contexts: MetaContexts) -> Self {
        Self {
            contexts,
            selector: MetaValueSelector::default(),
            prefix: None,
            suffix: None,
            prefixes: ChatMetaMap::new(),
            suffixes: ChatMetaMap::new(),
            meta: MetaMultimap::new(),
            weight: 0,
            primary_group: None,
        }
    }

    pub fn contexts(&self) -> &MetaContexts {
        &self.contexts
    }

    pub fn get_prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn get_suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// Every prefix by priority, highest first.
    pub fn get_prefixes(&self) -> Vec<(i32, &str)> {
        self.prefixes.iter().map(|(p, v)| (p.0, v.as_str())).collect()
    }

    pub fn get_suffixes(&self) -> Vec<(i32, &str)> {
        self.suffixes.iter().map(|(p, v)| (p.0, v.as_str())).collect()
    }

    pub fn get_meta_multimap(&self) -> &MetaMultimap {
        &self.meta
    }

    /// One value per key, chosen by the configured selector.
    pub fn get_meta(&self) -> HashMap<&str, &str> {
        self.meta
            .iter()
            .filter_map(|(k, values)| self.selector.select(values).map(|v| (k.as_str(), v)))
            .collect()
    }

    pub fn get_meta_value(&self, key: &str) -> Option<&str> {
        self.meta
            .get(&key.to_lowercase())
            .and_then(|values| self.selector.select(values))
    }

    pub fn get_weight(&self) -> i32 {
        self.weight
    }

    pub fn get_primary_group(&self) -> Option<&str> {
        self.primary_group.as_deref()
    }

    pub fn prefix_stack_definition(&self) -> &MetaStackDefinition {
        &self.contexts.prefix_stack
    }

    pub fn suffix_stack_definition(&self) -> &MetaStackDefinition {
        &self.contexts.suffix_stack
    }
}
