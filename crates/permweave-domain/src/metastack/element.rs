//! Meta stack elements.
//!
//! An element keeps one winning prefix or suffix. A candidate replaces the
//! current winner when it passes the element's origin filter and beats the
//! winner's priority strictly, so on ties the first candidate seen stays.

use std::fmt;

use crate::error::{DomainError, DomainResult};
use crate::holder::{HolderId, TrackRegistry};

/// A prefix or suffix offered to a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMetaEntry {
    pub priority: i32,
    pub value: String,
    /// Holder the node was granted on, when known.
    pub origin: Option<HolderId>,
}

impl ChatMetaEntry {
    pub fn new(priority: i32, value: impl Into<String>, origin: Option<HolderId>) -> Self {
        Self {
            priority,
            value: value.into(),
            origin,
        }
    }

    fn origin_group(&self) -> Option<&str> {
        self.origin.as_ref().and_then(HolderId::group_name)
    }
}

/// Which end of the priority range an element keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriorityRule {
    Highest,
    Lowest,
}

/// Restricts the candidates an element considers by origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OriginFilter {
    Any,
    /// Granted directly on a user.
    Own,
    /// Granted on a group.
    Inherited,
    FromGroup(String),
    NotFromGroup(String),
    OnTrack(String),
    NotOnTrack(String),
}

/// One slot of a meta stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackElement {
    rule: PriorityRule,
    filter: OriginFilter,
}

impl StackElement {
    pub fn new(rule: PriorityRule, filter: OriginFilter) -> Self {
        Self { rule, filter }
    }

    pub fn highest() -> Self {
        Self::new(PriorityRule::Highest, OriginFilter::Any)
    }

    pub fn lowest() -> Self {
        Self::new(PriorityRule::Lowest, OriginFilter::Any)
    }

    pub fn rule(&self) -> PriorityRule {
        self.rule
    }

    pub fn filter(&self) -> &OriginFilter {
        &self.filter
    }

    /// Parses `highest`, `lowest_own`, `highest_on_track_<track>`, ...
    pub fn parse(value: &str) -> DomainResult<Self> {
        let lower = value.trim().to_lowercase();
        let invalid = || DomainError::InvalidStackDefinition {
            value: value.to_string(),
        };

        let (rule, rest) = if let Some(rest) = lower.strip_prefix("highest") {
            (PriorityRule::Highest, rest)
        } else if let Some(rest) = lower.strip_prefix("lowest") {
            (PriorityRule::Lowest, rest)
        } else {
            return Err(invalid());
        };

        let param = |prefix: &str| -> Option<String> {
            rest.strip_prefix(prefix)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
        };

        let filter = match rest {
            "" => OriginFilter::Any,
            "_own" => OriginFilter::Own,
            "_inherited" => OriginFilter::Inherited,
            _ => {
                if let Some(track) = param("_on_track_") {
                    OriginFilter::OnTrack(track)
                } else if let Some(track) = param("_not_on_track_") {
                    OriginFilter::NotOnTrack(track)
                } else if let Some(group) = param("_from_group_") {
                    OriginFilter::FromGroup(group)
                } else if let Some(group) = param("_not_from_group_") {
                    OriginFilter::NotFromGroup(group)
                } else {
                    return Err(invalid());
                }
            }
        };
        Ok(Self::new(rule, filter))
    }

    /// Whether `candidate` should replace `current`.
    pub fn should_accumulate(
        &self,
        candidate: &ChatMetaEntry,
        current: Option<&ChatMetaEntry>,
        tracks: &TrackRegistry,
    ) -> bool {
        if !self.passes_filter(candidate, tracks) {
            return false;
        }
        match (self.rule, current) {
            (_, None) => true,
            (PriorityRule::Highest, Some(current)) => candidate.priority > current.priority,
            (PriorityRule::Lowest, Some(current)) => candidate.priority < current.priority,
        }
    }

    fn passes_filter(&self, candidate: &ChatMetaEntry, tracks: &TrackRegistry) -> bool {
        match &self.filter {
            OriginFilter::Any => true,
            OriginFilter::Own => matches!(candidate.origin, Some(HolderId::User(_))),
            OriginFilter::Inherited => matches!(candidate.origin, Some(HolderId::Group(_))),
            OriginFilter::FromGroup(group) => candidate.origin_group() == Some(group.as_str()),
            OriginFilter::NotFromGroup(group) => candidate.origin_group() != Some(group.as_str()),
            OriginFilter::OnTrack(track) => {
                let Some(origin) = candidate.origin_group() else {
                    return false;
                };
                tracks.contains_group(track, origin).unwrap_or(false)
            }
            OriginFilter::NotOnTrack(track) => match candidate.origin_group() {
                Some(origin) => tracks.contains_group(track, origin) == Some(false),
                None => tracks.is_loaded(track),
            },
        }
    }
}

impl fmt::Display for StackElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rule {
            PriorityRule::Highest => f.write_str("highest")?,
            PriorityRule::Lowest => f.write_str("lowest")?,
        }
        match &self.filter {
            OriginFilter::Any => Ok(()),
            OriginFilter::Own => f.write_str("_own"),
            OriginFilter::Inherited => f.write_str("_inherited"),
            OriginFilter::FromGroup(g) => write!(f, "_from_group_{g}"),
            OriginFilter::NotFromGroup(g) => write!(f, "_not_from_group_{g}"),
            OriginFilter::OnTrack(t) => write!(f, "_on_track_{t}"),
            OriginFilter::NotOnTrack(t) => write!(f, "_not_on_track_{t}"),
        }
    }
}
