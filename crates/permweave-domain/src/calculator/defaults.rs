//! Boundary to the hosting platform's default permission registry.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

use super::tristate::Tristate;

/// Supplies "does the platform grant this by default" answers.
///
/// Consulted only by the defaults processor, after every node-based lookup.
pub trait PlatformDefaultsProvider: Send + Sync + fmt::Debug {
    /// Default value of `permission` for an operator or a regular subject.
    fn default_value(&self, permission: &str, operator: bool) -> Tristate;
}

/// A provider that knows no defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPlatformDefaults;

impl PlatformDefaultsProvider for NoPlatformDefaults {
    fn default_value(&self, _permission: &str, _operator: bool) -> Tristate {
        Tristate::Undefined
    }
}

/// Who a registered default applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultGrant {
    Everyone,
    OperatorsOnly,
    NonOperatorsOnly,
    Nobody,
}

/// An in-process defaults registry, filled by the platform adapter.
#[derive(Debug, Default)]
pub struct StaticPlatformDefaults {
    grants: RwLock<HashMap<String, DefaultGrant>>,
}

impl StaticPlatformDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, permission: impl AsRef<str>, grant: DefaultGrant) {
        self.grants
            .write()
            .insert(permission.as_ref().to_lowercase(), grant);
    }

    pub fn unregister(&self, permission: &str) {
        self.grants.write().remove(&permission.to_lowercase());
    }
}

impl PlatformDefaultsProvider for StaticPlatformDefaults {
    fn default_value(&self, permission: &str, operator: bool) -> Tristate {
        match self.grants.read().get(permission) {
            Some(DefaultGrant::Everyone) => Tristate::True,
            Some(DefaultGrant::OperatorsOnly) => Tristate::from_bool(operator),
            Some(DefaultGrant::NonOperatorsOnly) => Tristate::from_bool(!operator),
            Some(DefaultGrant::Nobody) => Tristate::False,
            None => Tristate::Undefined,
        }
    }
}
