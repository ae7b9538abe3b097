//! Runtime options for resolution and caching.

use std::collections::HashMap;
use std::time::Duration;

use crate::calculator::ProcessorKind;
use crate::context::{ContextSatisfyMode, QueryOptions};
use crate::graph::TraversalAlgorithm;
use crate::metastack::{MetaStackDefinition, MetaValueSelector};

/// Configuration for the per-holder caches.
#[derive(Debug, Clone)]
pub struct CachedDataConfig {
    /// Entries idle longer than this are no longer served.
    pub expire_after_access: Duration,
    /// Maximum entries per container (permission or meta) of one holder.
    pub max_cached_entries: u64,
    /// Maximum memoised query results per permission calculator.
    pub calculator_memo_capacity: u64,
}

impl Default for CachedDataConfig {
    fn default() -> Self {
        Self {
            expire_after_access: Duration::from_secs(120),
            max_cached_entries: 256,
            calculator_memo_capacity: 10_000,
        }
    }
}

impl CachedDataConfig {
    pub fn with_expire_after_access(mut self, expire_after_access: Duration) -> Self {
        self.expire_after_access = expire_after_access;
        self
    }

    pub fn with_max_cached_entries(mut self, max_entries: u64) -> Self {
        self.max_cached_entries = max_entries;
        self
    }

    pub fn with_calculator_memo_capacity(mut self, capacity: u64) -> Self {
        self.calculator_memo_capacity = capacity;
        self
    }
}

/// Configuration for permission and meta resolution.
#[derive(Debug, Clone)]
pub struct ResolutionConfig {
    pub context_satisfy_mode: ContextSatisfyMode,
    pub inheritance_traversal_algorithm: TraversalAlgorithm,
    /// Re-sort traversal output by group weight after walking.
    pub post_traversal_inheritance_sort: bool,
    /// Processors consulted after the direct lookup, in order.
    pub processor_order: Vec<ProcessorKind>,
    pub apply_wildcards: bool,
    pub apply_regex: bool,
    pub apply_sponge_implicit_wildcards: bool,
    /// Let platform defaults replace answers derived from wildcards.
    pub apply_default_negations_before_wildcards: bool,
    pub prefix_stack: MetaStackDefinition,
    pub suffix_stack: MetaStackDefinition,
    pub meta_value_selector: MetaValueSelector,
    /// Weights for groups that carry no `weight.N` node.
    pub group_weights: HashMap<String, i32>,
    /// Primary group of users that have not chosen one.
    pub default_primary_group: String,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            context_satisfy_mode: ContextSatisfyMode::AtLeastOneValuePerKey,
            inheritance_traversal_algorithm: TraversalAlgorithm::DepthFirstPreOrder,
            post_traversal_inheritance_sort: false,
            processor_order: vec![
                ProcessorKind::Wildcard,
                ProcessorKind::SpongeWildcard,
                ProcessorKind::Regex,
                ProcessorKind::Defaults,
            ],
            apply_wildcards: true,
            apply_regex: true,
            apply_sponge_implicit_wildcards: false,
            apply_default_negations_before_wildcards: false,
            prefix_stack: MetaStackDefinition::default(),
            suffix_stack: MetaStackDefinition::default(),
            meta_value_selector: MetaValueSelector::First,
            group_weights: HashMap::new(),
            default_primary_group: "default".to_string(),
        }
    }
}

impl ResolutionConfig {
    pub fn with_context_satisfy_mode(mut self, mode: ContextSatisfyMode) -> Self {
        self.context_satisfy_mode = mode;
        self
    }

    pub fn with_traversal_algorithm(mut self, algorithm: TraversalAlgorithm) -> Self {
        self.inheritance_traversal_algorithm = algorithm;
        self
    }

    pub fn with_post_traversal_sort(mut self, enabled: bool) -> Self {
        self.post_traversal_inheritance_sort = enabled;
        self
    }

    pub fn with_processor_order(mut self, order: Vec<ProcessorKind>) -> Self {
        self.processor_order = order;
        self
    }

    pub fn with_apply_wildcards(mut self, enabled: bool) -> Self {
        self.apply_wildcards = enabled;
        self
    }

    pub fn with_apply_regex(mut self, enabled: bool) -> Self {
        self.apply_regex = enabled;
        self
    }

    pub fn with_apply_sponge_implicit_wildcards(mut self, enabled: bool) -> Self {
        self.apply_sponge_implicit_wildcards = enabled;
        self
    }

    pub fn with_apply_default_negations_before_wildcards(mut self, enabled: bool) -> Self {
        self.apply_default_negations_before_wildcards = enabled;
        self
    }

    pub fn with_prefix_stack(mut self, definition: MetaStackDefinition) -> Self {
        self.prefix_stack = definition;
        self
    }

    pub fn with_suffix_stack(mut self, definition: MetaStackDefinition) -> Self {
        self.suffix_stack = definition;
        self
    }

    pub fn with_meta_value_selector(mut self, selector: MetaValueSelector) -> Self {
        self.meta_value_selector = selector;
        self
    }

    pub fn with_group_weight(mut self, group: impl AsRef<str>, weight: i32) -> Self {
        self.group_weights
            .insert(group.as_ref().trim().to_lowercase(), weight);
        self
    }

    pub fn with_default_primary_group(mut self, group: impl AsRef<str>) -> Self {
        self.default_primary_group = group.as_ref().trim().to_lowercase();
        self
    }

    /// Applies the configured satisfy mode to caller-built query options.
    pub fn apply_to(&self, query: QueryOptions) -> QueryOptions {
        query.with_satisfy_mode(self.context_satisfy_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_data_defaults() {
        let config = CachedDataConfig::default();

        assert_eq!(config.expire_after_access, Duration::from_secs(120));
        assert_eq!(config.max_cached_entries, 256);
        assert_eq!(config.calculator_memo_capacity, 10_000);
    }

    #[test]
    fn test_resolution_defaults() {
        let config = ResolutionConfig::default();

        assert_eq!(
            config.inheritance_traversal_algorithm,
            TraversalAlgorithm::DepthFirstPreOrder
        );
        assert!(!config.post_traversal_inheritance_sort);
        assert!(!config.apply_sponge_implicit_wildcards);
        assert_eq!(config.default_primary_group, "default");
    }

    #[test]
    fn test_builders_normalise_group_names() {
        let config = ResolutionConfig::default()
            .with_group_weight(" Admin ", 50)
            .with_default_primary_group("Member");

        assert_eq!(config.group_weights.get("admin"), Some(&50));
        assert_eq!(config.default_primary_group, "member");
    }
}
