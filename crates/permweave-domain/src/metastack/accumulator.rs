//! Collects meta while walking the inheritance graph.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::definition::{MetaStack, MetaStackDefinition};
use super::element::ChatMetaEntry;
use crate::error::{DomainError, DomainResult};
use crate::holder::{HolderId, TrackRegistry};
use crate::node::{ChatMetaType, Node, NodeType, PRIMARY_GROUP_META_KEY, WEIGHT_META_KEY};

/// Chat meta keyed by priority, highest first.
pub type ChatMetaMap = BTreeMap<Reverse<i32>, String>;

/// Meta values per key, in the order they were accumulated.
pub type MetaMultimap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Accumulating,
    Complete,
}

/// Accumulates meta, prefixes and suffixes in traversal order.
///
/// Accumulation happens in the `Accumulating` state only; results can be
/// read once [`complete`](Self::complete) has been called.
#[derive(Debug)]
pub struct MetaAccumulator {
    state: State,
    meta: MetaMultimap,
    prefixes: ChatMetaMap,
    suffixes: ChatMetaMap,
    weight: i32,
    primary_group: Option<String>,
    prefix_stack: MetaStack,
    suffix_stack: MetaStack,
    tracks: Arc<TrackRegistry>,
}

impl MetaAccumulator {
    pub fn new(
        prefix_definition: MetaStackDefinition,
        suffix_definition: MetaStackDefinition,
        tracks: Arc<TrackRegistry>,
    ) -> Self {
        Self {
            state: State::Accumulating,
            meta: MetaMultimap::new(),
            prefixes: ChatMetaMap::new(),
            suffixes: ChatMetaMap::new(),
            weight: 0,
            primary_group: None,
            prefix_stack: MetaStack::new(prefix_definition),
            suffix_stack: MetaStack::new(suffix_definition),
            tracks,
        }
    }

    fn ensure(&self, expected: State) -> DomainResult<()> {
        if self.state == expected {
            return Ok(());
        }
        let message = match expected {
            State::Accumulating => "meta accumulator is already complete",
            State::Complete => "meta accumulator has not been completed",
        };
        Err(DomainError::IllegalState {
            message: message.to_string(),
        })
    }

    // ------------------------------------------------------------
    // Accumulation
    // ------------------------------------------------------------

    /// Feeds a meta, prefix or suffix node. Other node types are ignored;
    /// weights are accumulated from group weights instead.
    pub fn accumulate_node(&mut self, node: &Node) -> DomainResult<()> {
        self.ensure(State::Accumulating)?;
        let origin = node.origin().map(|o| o.holder.clone());
        match node.node_type() {
            NodeType::Meta { key, value } => self.accumulate_meta(key, value),
            NodeType::Prefix { priority, value } => {
                self.accumulate_chat_meta(ChatMetaType::Prefix, *priority, value, origin)
            }
            NodeType::Suffix { priority, value } => {
                self.accumulate_chat_meta(ChatMetaType::Suffix, *priority, value, origin)
            }
            _ => Ok(()),
        }
    }

    pub fn accumulate_meta(&mut self, key: &str, value: &str) -> DomainResult<()> {
        self.ensure(State::Accumulating)?;
        self.meta
            .entry(key.to_lowercase())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    pub fn accumulate_prefix(&mut self, priority: i32, value: &str) -> DomainResult<()> {
        self.accumulate_chat_meta(ChatMetaType::Prefix, priority, value, None)
    }

    pub fn accumulate_suffix(&mut self, priority: i32, value: &str) -> DomainResult<()> {
        self.accumulate_chat_meta(ChatMetaType::Suffix, priority, value, None)
    }

    fn accumulate_chat_meta(
        &mut self,
        kind: ChatMetaType,
        priority: i32,
        value: &str,
        origin: Option<HolderId>,
    ) -> DomainResult<()> {
        self.ensure(State::Accumulating)?;
        let entry = ChatMetaEntry::new(priority, value, origin);
        let (map, stack) = match kind {
            ChatMetaType::Prefix => (&mut self.prefixes, &mut self.prefix_stack),
            ChatMetaType::Suffix => (&mut self.suffixes, &mut self.suffix_stack),
        };
        map.entry(Reverse(priority))
            .or_insert_with(|| value.to_string());
        stack.accumulate(&entry, &self.tracks);
        Ok(())
    }

    /// Keeps the highest weight seen.
    pub fn accumulate_weight(&mut self, weight: i32) -> DomainResult<()> {
        self.ensure(State::Accumulating)?;
        self.weight = self.weight.max(weight);
        Ok(())
    }

    pub fn set_primary_group(&mut self, group: impl Into<String>) -> DomainResult<()> {
        self.ensure(State::Accumulating)?;
        self.primary_group = Some(group.into());
        Ok(())
    }

    /// Finishes accumulation, publishing the weight and primary group as
    /// meta unless nodes already set them. Calling it twice is a no-op.
    pub fn complete(&mut self) {
        if self.state == State::Complete {
            return;
        }
        self.state = State::Complete;

        if self.weight != 0 && !self.meta.contains_key(WEIGHT_META_KEY) {
            self.meta
                .insert(WEIGHT_META_KEY.to_string(), vec![self.weight.to_string()]);
        }
        if let Some(primary_group) = &self.primary_group {
            if !self.meta.contains_key(PRIMARY_GROUP_META_KEY) {
                self.meta
                    .insert(PRIMARY_GROUP_META_KEY.to_string(), vec![primary_group.clone()]);
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    // ------------------------------------------------------------
    // Results
    // ------------------------------------------------------------

    pub fn meta(&self) -> DomainResult<&MetaMultimap> {
        self.ensure(State::Complete)?;
        Ok(&self.meta)
    }

    pub fn prefixes(&self) -> DomainResult<&ChatMetaMap> {
        self.ensure(State::Complete)?;
        Ok(&self.prefixes)
    }

    pub fn suffixes(&self) -> DomainResult<&ChatMetaMap> {
        self.ensure(State::Complete)?;
        Ok(&self.suffixes)
    }

    pub fn weight(&self) -> DomainResult<i32> {
        self.ensure(State::Complete)?;
        Ok(self.weight)
    }

    pub fn primary_group(&self) -> DomainResult<Option<&str>> {
        self.ensure(State::Complete)?;
        Ok(self.primary_group.as_deref())
    }

    pub fn prefix_definition(&self) -> DomainResult<&MetaStackDefinition> {
        self.ensure(State::Complete)?;
        Ok(self.prefix_stack.definition())
    }

    pub fn suffix_definition(&self) -> DomainResult<&MetaStackDefinition> {
        self.ensure(State::Complete)?;
        Ok(self.suffix_stack.definition())
    }

    /// The formatted prefix stack.
    pub fn prefix(&self) -> DomainResult<Option<String>> {
        self.ensure(State::Complete)?;
        Ok(self.prefix_stack.to_formatted_string())
    }

    /// The formatted suffix stack.
    pub fn suffix(&self) -> DomainResult<Option<String>> {
        self.ensure(State::Complete)?;
        Ok(self.suffix_stack.to_formatted_string())
    }
}
