//! Stack definitions and the per-accumulation stack state.

use std::collections::HashSet;

use super::element::{ChatMetaEntry, StackElement};
use crate::error::{DomainError, DomainResult};
use crate::holder::TrackRegistry;

/// How repeated values are collapsed when a stack is formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DuplicateRemoval {
    #[default]
    RetainAll,
    FirstOnly,
    LastOnly,
}

impl DuplicateRemoval {
    pub fn parse(value: &str) -> DomainResult<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "retain-all" | "none" => Ok(Self::RetainAll),
            "first-only" => Ok(Self::FirstOnly),
            "last-only" => Ok(Self::LastOnly),
            _ => Err(DomainError::InvalidStackDefinition {
                value: value.to_string(),
            }),
        }
    }

    fn apply(self, values: Vec<String>) -> Vec<String> {
        match self {
            DuplicateRemoval::RetainAll => values,
            DuplicateRemoval::FirstOnly => {
                let mut seen = HashSet::new();
                values.into_iter().filter(|v| seen.insert(v.clone())).collect()
            }
            DuplicateRemoval::LastOnly => {
                let mut seen = HashSet::new();
                let mut kept: Vec<String> = values
                    .into_iter()
                    .rev()
                    .filter(|v| seen.insert(v.clone()))
                    .collect();
                kept.reverse();
                kept
            }
        }
    }
}

/// How prefixes or suffixes are picked and joined.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetaStackDefinition {
    elements: Vec<StackElement>,
    duplicate_removal: DuplicateRemoval,
    start_spacer: String,
    middle_spacer: String,
    end_spacer: String,
}

impl Default for MetaStackDefinition {
    /// A single `highest` element.
    fn default() -> Self {
        Self {
            elements: vec![StackElement::highest()],
            duplicate_removal: DuplicateRemoval::RetainAll,
            start_spacer: String::new(),
            middle_spacer: " ".to_string(),
            end_spacer: String::new(),
        }
    }
}

impl MetaStackDefinition {
    pub fn new(
        elements: Vec<StackElement>,
        duplicate_removal: DuplicateRemoval,
        start_spacer: impl Into<String>,
        middle_spacer: impl Into<String>,
        end_spacer: impl Into<String>,
    ) -> Self {
        Self {
            elements,
            duplicate_removal,
            start_spacer: start_spacer.into(),
            middle_spacer: middle_spacer.into(),
            end_spacer: end_spacer.into(),
        }
    }

    /// Builds a definition from configuration strings.
    pub fn parse<S: AsRef<str>>(
        elements: &[S],
        duplicate_removal: &str,
        start_spacer: &str,
        middle_spacer: &str,
        end_spacer: &str,
    ) -> DomainResult<Self> {
        let elements = elements
            .iter()
            .map(|e| StackElement::parse(e.as_ref()))
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(Self::new(
            elements,
            DuplicateRemoval::parse(duplicate_removal)?,
            start_spacer,
            middle_spacer,
            end_spacer,
        ))
    }

    pub fn elements(&self) -> &[StackElement] {
        &self.elements
    }

    pub fn duplicate_removal(&self) -> DuplicateRemoval {
        self.duplicate_removal
    }

    pub fn start_spacer(&self) -> &str {
        &self.start_spacer
    }

    pub fn middle_spacer(&self) -> &str {
        &self.middle_spacer
    }

    pub fn end_spacer(&self) -> &str {
        &self.end_spacer
    }
}

/// The winners of one definition during a single accumulation.
#[derive(Debug, Clone)]
pub struct MetaStack {
    definition: MetaStackDefinition,
    winners: Vec<Option<ChatMetaEntry>>,
}

impl MetaStack {
    pub fn new(definition: MetaStackDefinition) -> Self {
        let winners = vec![None; definition.elements.len()];
        Self {
            definition,
            winners,
        }
    }

    pub fn definition(&self) -> &MetaStackDefinition {
        &self.definition
    }

    /// Offers a candidate to every element.
    pub fn accumulate(&mut self, candidate: &ChatMetaEntry, tracks: &TrackRegistry) {
        for (element, winner) in self.definition.elements.iter().zip(self.winners.iter_mut()) {
            if element.should_accumulate(candidate, winner.as_ref(), tracks) {
                *winner = Some(candidate.clone());
            }
        }
    }

    /// The winning entries, in element order.
    pub fn winners(&self) -> impl Iterator<Item = &ChatMetaEntry> {
        self.winners.iter().flatten()
    }

    /// Joins the winners with the configured spacers. `None` if no element
    /// has a winner.
    pub fn to_formatted_string(&self) -> Option<String> {
        let values: Vec<String> = self.winners().map(|w| w.value.clone()).collect();
        if values.is_empty() {
            return None;
        }
        let values = self.definition.duplicate_removal.apply(values);
        Some(format!(
            "{}{}{}",
            self.definition.start_spacer,
            values.join(&self.definition.middle_spacer),
            self.definition.end_spacer
        ))
    }
}
