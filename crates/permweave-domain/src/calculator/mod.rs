//! Permission calculation over a flattened permission map.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     PermissionData                       │
//! │   validation + metrics, one per cached QueryOptions      │
//! └───────────────────────────┬──────────────────────────────┘
//!                             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                  PermissionCalculator                    │
//! │   moka memo ──► Direct ─► Wildcard ─► Regex ─► Defaults  │
//! │                 (first defined answer wins)              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Calculators are built by a [`CalculatorFactory`] that owns the processor
//! order and the resources shared between calculators (compiled regexes,
//! the platform defaults provider).

mod defaults;
mod processor;
mod regex_cache;
mod tristate;

use std::fmt;
use std::sync::Arc;

use moka::sync::Cache;
use tracing::debug;

use crate::config::{CachedDataConfig, ResolutionConfig};
use crate::context::QueryOptions;
use crate::error::{DomainError, DomainResult};

pub use defaults::{DefaultGrant, NoPlatformDefaults, PlatformDefaultsProvider, StaticPlatformDefaults};
pub use processor::{
    DefaultsProcessor, DirectProcessor, PermissionMap, PermissionProcessor, ProcessorKind,
    RegexProcessor, SpongeWildcardProcessor, WildcardProcessor,
};
pub use regex_cache::RegexCache;
pub use tristate::{Tristate, TristateResult};

/// Answers tristate queries against one flattened permission map.
pub struct PermissionCalculator {
    source: Arc<PermissionMap>,
    processors: Vec<Box<dyn PermissionProcessor>>,
    memo: Cache<String, TristateResult>,
}

impl fmt::Debug for PermissionCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionCalculator")
            .field("permissions", &self.source.len())
            .field("processors", &self.processors)
            .field("memoised", &self.memo.entry_count())
            .finish()
    }
}

impl PermissionCalculator {
    /// Builds a calculator asking `processors` in the given order.
    pub fn new(
        source: Arc<PermissionMap>,
        processors: Vec<Box<dyn PermissionProcessor>>,
        memo_capacity: u64,
    ) -> Self {
        Self {
            source,
            processors,
            memo: Cache::new(memo_capacity),
        }
    }

    pub fn source(&self) -> &PermissionMap {
        &self.source
    }

    /// Looks up `permission` (case-insensitively) and reports which processor
    /// answered.
    pub fn check_permission(&self, permission: &str) -> TristateResult {
        let permission = permission.to_lowercase();
        if let Some(hit) = self.memo.get(permission.as_str()) {
            return hit;
        }
        let result = self.compute(&permission);
        self.memo.insert(permission, result);
        result
    }

    pub fn get_permission_value(&self, permission: &str) -> Tristate {
        self.check_permission(permission).result
    }

    fn compute(&self, permission: &str) -> TristateResult {
        let mut result = TristateResult::UNDEFINED;
        for processor in &self.processors {
            if !result.is_defined() {
                let answer = processor.has_permission(permission);
                if answer.is_defined() {
                    result = TristateResult::new(answer, processor.kind());
                }
                continue;
            }

            let Some(answered_by) = result.processor else {
                continue;
            };
            if processor.overrides_wildcards() && answered_by.is_wildcard() {
                let answer = processor.has_permission(permission);
                if answer.is_defined() {
                    result = TristateResult {
                        result: answer,
                        processor: Some(processor.kind()),
                        overridden: Some((result.result, answered_by)),
                    };
                }
            }
        }
        result
    }

    /// Clears the query memo and every processor's internal state. The
    /// permission map is kept.
    pub fn invalidate_cache(&self) {
        self.memo.invalidate_all();
        for processor in &self.processors {
            processor.invalidate();
        }
    }
}

/// Builds calculators with a configured processor chain.
pub struct CalculatorFactory {
    order: Vec<ProcessorKind>,
    override_wildcards: bool,
    memo_capacity: u64,
    regex_cache: Arc<RegexCache>,
    defaults: Arc<dyn PlatformDefaultsProvider>,
}

impl fmt::Debug for CalculatorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalculatorFactory")
            .field("order", &self.order)
            .field("override_wildcards", &self.override_wildcards)
            .field("memo_capacity", &self.memo_capacity)
            .field("compiled_patterns", &self.regex_cache.entry_count())
            .finish()
    }
}

impl CalculatorFactory {
    /// Direct lookup is always first; the configured order follows, minus
    /// processors switched off by the `apply_*` flags.
    pub fn new(
        resolution: &ResolutionConfig,
        cache: &CachedDataConfig,
        defaults: Arc<dyn PlatformDefaultsProvider>,
    ) -> Self {
        let mut order = vec![ProcessorKind::Direct];
        for kind in &resolution.processor_order {
            let enabled = match kind {
                ProcessorKind::Direct => false,
                ProcessorKind::Wildcard => resolution.apply_wildcards,
                ProcessorKind::SpongeWildcard => resolution.apply_sponge_implicit_wildcards,
                ProcessorKind::Regex => resolution.apply_regex,
                ProcessorKind::Defaults => true,
            };
            if enabled && !order.contains(kind) {
                order.push(*kind);
            }
        }
        debug!(?order, "configured permission processors");

        Self {
            order,
            override_wildcards: resolution.apply_default_negations_before_wildcards,
            memo_capacity: cache.calculator_memo_capacity,
            regex_cache: Arc::new(RegexCache::new()),
            defaults,
        }
    }

    pub fn order(&self) -> &[ProcessorKind] {
        &self.order
    }

    pub fn regex_cache(&self) -> &RegexCache {
        &self.regex_cache
    }

    pub fn build(&self, source: PermissionMap, query: &QueryOptions) -> PermissionCalculator {
        let source = Arc::new(source);
        let processors = self
            .order
            .iter()
            .map(|kind| -> Box<dyn PermissionProcessor> {
                match kind {
                    ProcessorKind::Direct => Box::new(DirectProcessor::new(Arc::clone(&source))),
                    ProcessorKind::Wildcard => Box::new(WildcardProcessor::new(&source)),
                    ProcessorKind::SpongeWildcard => {
                        Box::new(SpongeWildcardProcessor::new(Arc::clone(&source)))
                    }
                    ProcessorKind::Regex => {
                        Box::new(RegexProcessor::new(&source, Arc::clone(&self.regex_cache)))
                    }
                    ProcessorKind::Defaults => Box::new(DefaultsProcessor::new(
                        Arc::clone(&self.defaults),
                        query.is_operator(),
                        self.override_wildcards,
                        self.memo_capacity,
                    )),
                }
            })
            .collect();
        PermissionCalculator::new(source, processors, self.memo_capacity)
    }
}

/// Cached permission state of one holder under one [`QueryOptions`].
#[derive(Debug)]
pub struct PermissionData {
    query: QueryOptions,
    calculator: PermissionCalculator,
}

impl PermissionData {
    pub fn new(query: QueryOptions, calculator: PermissionCalculator) -> Self {
        Self { query, calculator }
    }

    /// Data with no permissions, served when computation fails.
    pub fn empty(query: QueryOptions) -> Self {
        let calculator = PermissionCalculator::new(Arc::new(PermissionMap::new()), Vec::new(), 1);
        Self { query, calculator }
    }

    pub fn query(&self) -> &QueryOptions {
        &self.query
    }

    /// Validated lookup. Empty permissions or permissions containing
    /// whitespace are rejected.
    pub fn check_permission(&self, permission: &str) -> DomainResult<TristateResult> {
        validate_permission(permission)?;
        let result = self.calculator.check_permission(permission);
        metrics::counter!("permweave_permission_checks_total", "result" => result.result.as_str())
            .increment(1);
        Ok(result)
    }

    /// Total lookup: invalid permissions are `Undefined`.
    pub fn get_permission_value(&self, permission: &str) -> Tristate {
        self.check_permission(permission)
            .map(|result| result.result)
            .unwrap_or(Tristate::Undefined)
    }

    /// The flattened `permission → value` map.
    pub fn permission_map(&self) -> &PermissionMap {
        self.calculator.source()
    }

    pub fn invalidate_cache(&self) {
        self.calculator.invalidate_cache();
    }
}

fn validate_permission(permission: &str) -> DomainResult<()> {
    if permission.is_empty() || permission.chars().any(char::is_whitespace) {
        return Err(DomainError::InvalidPermission {
            value: permission.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn example_permissions() -> PermissionMap {
        [
            // direct
            ("test.node1", true),
            ("test.node2", false),
            // wildcard
            ("one.two.three.four", true),
            ("one.two.three.*", false),
            ("one.two.three", true),
            ("one.two.*", false),
            ("one.two", true),
            ("one.*", false),
            ("one", true),
            ("*", false),
            // regex
            ("r=hello\\d+", true),
            ("R=rege(x(es)?|xps?)[1-5]", false),
            // override
            ("overridetest.*", true),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    fn calculator(kinds: &[ProcessorKind]) -> PermissionCalculator {
        let source = Arc::new(example_permissions());
        let cache = Arc::new(RegexCache::new());
        let processors = kinds
            .iter()
            .map(|kind| -> Box<dyn PermissionProcessor> {
                match kind {
                    ProcessorKind::Direct => Box::new(DirectProcessor::new(Arc::clone(&source))),
                    ProcessorKind::Wildcard => Box::new(WildcardProcessor::new(&source)),
                    ProcessorKind::SpongeWildcard => {
                        Box::new(SpongeWildcardProcessor::new(Arc::clone(&source)))
                    }
                    ProcessorKind::Regex => Box::new(RegexProcessor::new(&source, Arc::clone(&cache))),
                    ProcessorKind::Defaults => unreachable!("not used here"),
                }
            })
            .collect();
        PermissionCalculator::new(source, processors, 100)
    }

    // ============================================================
    // Section 1: Processors
    // ============================================================

    #[test]
    fn test_direct() {
        let calc = calculator(&[ProcessorKind::Direct]);

        for (node, expected) in [
            ("test", Tristate::Undefined),
            ("test.node1", Tristate::True),
            ("test.node2", Tristate::False),
        ] {
            let result = calc.check_permission(node);
            assert_eq!(result.result, expected, "{node}");
            assert!(result.overridden.is_none());
            let expected_processor = expected.is_defined().then_some(ProcessorKind::Direct);
            assert_eq!(result.processor, expected_processor, "{node}");
        }
    }

    #[test]
    fn test_wildcard() {
        let calc = calculator(&[ProcessorKind::Direct, ProcessorKind::Wildcard]);

        let cases = [
            ("one.two.three.four", true, ProcessorKind::Direct),
            ("one.two.three.test", false, ProcessorKind::Wildcard),
            ("one.two.three.*", false, ProcessorKind::Direct),
            ("one.two.three", true, ProcessorKind::Direct),
            ("one.two.test", false, ProcessorKind::Wildcard),
            ("one.two.*", false, ProcessorKind::Direct),
            ("one.two", true, ProcessorKind::Direct),
            ("one.test", false, ProcessorKind::Wildcard),
            ("one.*", false, ProcessorKind::Direct),
            ("one", true, ProcessorKind::Direct),
            ("test", false, ProcessorKind::Wildcard),
            ("*", false, ProcessorKind::Direct),
        ];
        for (node, expected, processor) in cases {
            let result = calc.check_permission(node);
            assert_eq!(result.result, Tristate::from_bool(expected), "{node}");
            assert_eq!(result.processor, Some(processor), "{node}");
        }
    }

    #[test]
    fn test_sponge_wildcard() {
        let calc = calculator(&[ProcessorKind::Direct, ProcessorKind::SpongeWildcard]);

        let cases = [
            ("one", ProcessorKind::Direct),
            ("one.test", ProcessorKind::SpongeWildcard),
            ("one.two", ProcessorKind::Direct),
            ("one.two.test", ProcessorKind::SpongeWildcard),
        ];
        for (node, processor) in cases {
            let result = calc.check_permission(node);
            assert_eq!(result.result, Tristate::True, "{node}");
            assert_eq!(result.processor, Some(processor), "{node}");
        }
    }

    #[test]
    fn test_regex() {
        let calc = calculator(&[ProcessorKind::Direct, ProcessorKind::Regex]);

        let cases = [
            ("hello", Tristate::Undefined),
            ("hello1", Tristate::True),
            ("hello123", Tristate::True),
            ("helloo", Tristate::Undefined),
            ("regex1", Tristate::False),
            ("regexes2", Tristate::False),
            ("regexp3", Tristate::False),
            ("regexps4", Tristate::False),
        ];
        for (node, expected) in cases {
            let result = calc.check_permission(node);
            assert_eq!(result.result, expected, "{node}");
            let expected_processor = expected.is_defined().then_some(ProcessorKind::Regex);
            assert_eq!(result.processor, expected_processor, "{node}");
        }
    }

    #[derive(Debug)]
    struct OverrideTest;

    impl PermissionProcessor for OverrideTest {
        fn kind(&self) -> ProcessorKind {
            ProcessorKind::Defaults
        }

        fn has_permission(&self, permission: &str) -> Tristate {
            if permission == "overridetest.test" {
                Tristate::False
            } else {
                Tristate::Undefined
            }
        }

        fn overrides_wildcards(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_override_wildcard() {
        // Arrange
        let source = Arc::new(example_permissions());
        let calc = PermissionCalculator::new(
            Arc::clone(&source),
            vec![
                Box::new(DirectProcessor::new(Arc::clone(&source))),
                Box::new(WildcardProcessor::new(&source)),
                Box::new(OverrideTest),
            ],
            100,
        );

        // Act
        let result = calc.check_permission("overridetest.test");

        // Assert
        assert_eq!(result.result, Tristate::False);
        assert_eq!(result.processor, Some(ProcessorKind::Defaults));
        assert_eq!(result.overridden, Some((Tristate::True, ProcessorKind::Wildcard)));
    }

    #[test]
    fn test_queries_are_case_insensitive() {
        let calc = calculator(&[ProcessorKind::Direct]);

        assert_eq!(calc.get_permission_value("TEST.Node1"), Tristate::True);
    }

    // ============================================================
    // Section 2: Memoisation
    // ============================================================

    #[derive(Debug, Default)]
    struct CountingDefaults {
        calls: AtomicUsize,
    }

    impl PlatformDefaultsProvider for CountingDefaults {
        fn default_value(&self, _permission: &str, operator: bool) -> Tristate {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Tristate::from_bool(operator)
        }
    }

    #[test]
    fn test_invalidate_cache_keeps_map_but_clears_processor_state() {
        // Arrange
        let provider = Arc::new(CountingDefaults::default());
        let factory = CalculatorFactory::new(
            &ResolutionConfig::default(),
            &CachedDataConfig::default(),
            provider.clone(),
        );
        let calc = factory.build(
            PermissionMap::from([("a".to_string(), true)]),
            &QueryOptions::global().with_operator(true),
        );

        // Act
        assert_eq!(calc.get_permission_value("platform.perm"), Tristate::True);
        assert_eq!(calc.get_permission_value("platform.perm"), Tristate::True);
        let calls_before = provider.calls.load(Ordering::SeqCst);
        calc.invalidate_cache();
        calc.get_permission_value("platform.perm");

        // Assert
        assert_eq!(calls_before, 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(calc.get_permission_value("a"), Tristate::True);
    }

    // ============================================================
    // Section 3: Factory and PermissionData
    // ============================================================

    #[test]
    fn test_factory_order_respects_apply_flags() {
        let resolution = ResolutionConfig::default()
            .with_apply_regex(false)
            .with_apply_sponge_implicit_wildcards(true);

        let factory = CalculatorFactory::new(
            &resolution,
            &CachedDataConfig::default(),
            Arc::new(NoPlatformDefaults),
        );

        assert_eq!(
            factory.order(),
            &[
                ProcessorKind::Direct,
                ProcessorKind::Wildcard,
                ProcessorKind::SpongeWildcard,
                ProcessorKind::Defaults
            ]
        );
    }

    #[test]
    fn test_wildcard_grant_can_be_negated_by_specific_node() {
        let factory = CalculatorFactory::new(
            &ResolutionConfig::default(),
            &CachedDataConfig::default(),
            Arc::new(NoPlatformDefaults),
        );
        let calc = factory.build(
            PermissionMap::from([("perm.*".to_string(), true), ("perm.sub".to_string(), false)]),
            &QueryOptions::global(),
        );

        assert_eq!(calc.get_permission_value("perm.other"), Tristate::True);
        assert_eq!(calc.get_permission_value("perm.sub"), Tristate::False);
    }

    #[test]
    fn test_permission_data_rejects_malformed_permissions() {
        let data = PermissionData::empty(QueryOptions::global());

        assert!(matches!(
            data.check_permission(""),
            Err(DomainError::InvalidPermission { .. })
        ));
        assert!(matches!(
            data.check_permission("has space"),
            Err(DomainError::InvalidPermission { .. })
        ));
        assert_eq!(data.get_permission_value("has space"), Tristate::Undefined);
        assert_eq!(data.get_permission_value("fine"), Tristate::Undefined);
    }
}
