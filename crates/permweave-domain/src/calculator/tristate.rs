//! Three-valued permission results.

use std::fmt;

use super::processor::ProcessorKind;

/// Result of a permission lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Tristate {
    True,
    False,
    /// No node decided the permission. Callers conventionally deny.
    #[default]
    Undefined,
}

impl Tristate {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Tristate::True
        } else {
            Tristate::False
        }
    }

    /// `Undefined` maps to `false`.
    pub fn as_bool(self) -> bool {
        matches!(self, Tristate::True)
    }

    pub fn is_defined(self) -> bool {
        !matches!(self, Tristate::Undefined)
    }

    /// Lower-case label used in metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Tristate::True => "true",
            Tristate::False => "false",
            Tristate::Undefined => "undefined",
        }
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        Tristate::from_bool(value)
    }
}

impl fmt::Display for Tristate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A [`Tristate`] plus which processor produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TristateResult {
    pub result: Tristate,
    pub processor: Option<ProcessorKind>,
    /// The wildcard answer replaced by an overriding processor, if any.
    pub overridden: Option<(Tristate, ProcessorKind)>,
}

impl TristateResult {
    pub const UNDEFINED: TristateResult = TristateResult {
        result: Tristate::Undefined,
        processor: None,
        overridden: None,
    };

    pub fn new(result: Tristate, processor: ProcessorKind) -> Self {
        Self {
            result,
            processor: Some(processor),
            overridden: None,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.result.is_defined()
    }
}
