//! Query options: the key that selects which nodes apply to a lookup.

use std::fmt;

use super::set::{ContextSatisfyMode, ContextSet, SERVER_KEY, WORLD_KEY};
use crate::metastack::MetaStackDefinition;

/// A single query flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Flag {
    /// Include normal nodes whose context has no `server` key.
    IncludeNodesWithoutServerContext = 1,
    /// Include normal nodes whose context has no `world` key.
    IncludeNodesWithoutWorldContext = 1 << 1,
    /// Follow inheritance nodes whose context has no `server` key.
    ApplyInheritanceNodesWithoutServerContext = 1 << 2,
    /// Follow inheritance nodes whose context has no `world` key.
    ApplyInheritanceNodesWithoutWorldContext = 1 << 3,
    /// Walk the inheritance graph at all.
    ResolveInheritance = 1 << 4,
}

/// A set of [`Flag`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryFlags(u8);

impl QueryFlags {
    pub const fn none() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(0b1_1111)
    }

    pub fn contains(self, flag: Flag) -> bool {
        self.0 & flag as u8 != 0
    }

    pub fn with(self, flag: Flag, enabled: bool) -> Self {
        if enabled {
            Self(self.0 | flag as u8)
        } else {
            Self(self.0 & !(flag as u8))
        }
    }
}

impl Default for QueryFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// Whether a query is evaluated against active contexts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryMode {
    /// Only nodes whose context is satisfied by the given set apply.
    Contextual(ContextSet),
    /// Every node applies regardless of its context.
    NonContextual,
}

/// Options for a permission or meta query.
///
/// Equal options produce equal results, so these double as cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryOptions {
    mode: QueryMode,
    flags: QueryFlags,
    satisfy_mode: ContextSatisfyMode,
    operator: bool,
}

impl QueryOptions {
    /// Query against the given active contexts with default flags.
    pub fn contextual(contexts: ContextSet) -> Self {
        Self {
            mode: QueryMode::Contextual(contexts),
            flags: QueryFlags::default(),
            satisfy_mode: ContextSatisfyMode::default(),
            operator: false,
        }
    }

    /// Query against the global context.
    pub fn global() -> Self {
        Self::contextual(ContextSet::empty())
    }

    /// Query that ignores node contexts.
    pub fn non_contextual() -> Self {
        Self {
            mode: QueryMode::NonContextual,
            flags: QueryFlags::default(),
            satisfy_mode: ContextSatisfyMode::default(),
            operator: false,
        }
    }

    pub fn with_flags(mut self, flags: QueryFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_flag(mut self, flag: Flag, enabled: bool) -> Self {
        self.flags = self.flags.with(flag, enabled);
        self
    }

    pub fn with_satisfy_mode(mut self, mode: ContextSatisfyMode) -> Self {
        self.satisfy_mode = mode;
        self
    }

    /// Marks the subject as a platform operator, which changes the
    /// answers of the platform defaults processor.
    pub fn with_operator(mut self, operator: bool) -> Self {
        self.operator = operator;
        self
    }

    pub fn mode(&self) -> &QueryMode {
        &self.mode
    }

    /// The active contexts, if contextual.
    pub fn contexts(&self) -> Option<&ContextSet> {
        match &self.mode {
            QueryMode::Contextual(contexts) => Some(contexts),
            QueryMode::NonContextual => None,
        }
    }

    pub fn flags(&self) -> QueryFlags {
        self.flags
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.flags.contains(flag)
    }

    pub fn satisfy_mode(&self) -> ContextSatisfyMode {
        self.satisfy_mode
    }

    pub fn is_operator(&self) -> bool {
        self.operator
    }

    /// Returns whether a node context passes this query's context filter.
    pub fn satisfies(&self, node_context: &ContextSet) -> bool {
        match &self.mode {
            QueryMode::Contextual(active) => node_context.is_satisfied_by(active, self.satisfy_mode),
            QueryMode::NonContextual => true,
        }
    }

    /// True when normal nodes in `context` must be left out because of a
    /// missing `server`/`world` key.
    pub fn excludes_normal_nodes(&self, context: &ContextSet) -> bool {
        self.flag_excludes(Flag::IncludeNodesWithoutServerContext, SERVER_KEY, context)
            || self.flag_excludes(Flag::IncludeNodesWithoutWorldContext, WORLD_KEY, context)
    }

    /// True when inheritance nodes in `context` may be followed.
    pub fn includes_inheritance_nodes(&self, context: &ContextSet) -> bool {
        !self.flag_excludes(
            Flag::ApplyInheritanceNodesWithoutServerContext,
            SERVER_KEY,
            context,
        ) && !self.flag_excludes(
            Flag::ApplyInheritanceNodesWithoutWorldContext,
            WORLD_KEY,
            context,
        )
    }

    fn flag_excludes(&self, flag: Flag, key: &str, context: &ContextSet) -> bool {
        !self.flag(flag) && !context.contains_key(key)
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Display for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mode {
            QueryMode::Contextual(contexts) => write!(f, "contextual {contexts}"),
            QueryMode::NonContextual => write!(f, "non-contextual"),
        }
    }
}

/// Key of the meta cache: query options plus the stack definitions used
/// to build prefix and suffix strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetaContexts {
    pub query: QueryOptions,
    pub prefix_stack: MetaStackDefinition,
    pub suffix_stack: MetaStackDefinition,
}

impl MetaContexts {
    pub fn new(
        query: QueryOptions,
        prefix_stack: MetaStackDefinition,
        suffix_stack: MetaStackDefinition,
    ) -> Self {
        Self {
            query,
            prefix_stack,
            suffix_stack,
        }
    }
}
