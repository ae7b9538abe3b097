//! Nodes: single permission or meta grants.
//!
//! A [`Node`] is immutable once built. Its [`NodeType`] is derived from the
//! key (`group.admin`, `prefix.100.[A]`, `meta.rank.gold`, ...) so matching
//! on the type replaces runtime type tests.

mod types;

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration, Utc};

use crate::context::{ContextSet, ContextSetBuilder};
use crate::error::{DomainError, DomainResult};
use crate::holder::HolderId;

pub use types::{ChatMetaType, NodeKind, NodeType, PRIMARY_GROUP_META_KEY, WEIGHT_META_KEY};

/// Which of a holder's node maps a node lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Persisted nodes.
    Normal,
    /// Session-only nodes, cleared when the holder is unloaded.
    Transient,
}

/// Records which holder a node was granted on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InheritanceOrigin {
    pub holder: HolderId,
    pub data_type: DataType,
}

impl InheritanceOrigin {
    pub fn new(holder: HolderId, data_type: DataType) -> Self {
        Self { holder, data_type }
    }
}

/// A single grant.
///
/// Equality and hashing cover key, value, context and expiry. The origin
/// metadata is not part of a node's identity.
#[derive(Debug, Clone)]
pub struct Node {
    key: String,
    value: bool,
    context: ContextSet,
    expiry: Option<DateTime<Utc>>,
    node_type: NodeType,
    origin: Option<InheritanceOrigin>,
}

impl Node {
    /// Starts a builder for any key; the type is inferred.
    pub fn builder(key: impl Into<String>) -> NodeBuilder {
        NodeBuilder::new(key.into())
    }

    pub fn inheritance(group: impl AsRef<str>) -> NodeBuilder {
        Self::builder(format!("group.{}", group.as_ref()))
    }

    pub fn prefix(priority: i32, value: impl AsRef<str>) -> NodeBuilder {
        Self::builder(format!("prefix.{priority}.{}", value.as_ref()))
    }

    pub fn suffix(priority: i32, value: impl AsRef<str>) -> NodeBuilder {
        Self::builder(format!("suffix.{priority}.{}", value.as_ref()))
    }

    pub fn meta(key: impl AsRef<str>, value: impl AsRef<str>) -> NodeBuilder {
        Self::builder(format!("meta.{}.{}", key.as_ref(), value.as_ref()))
    }

    pub fn weight(weight: i32) -> NodeBuilder {
        Self::builder(format!("weight.{weight}"))
    }

    pub fn display_name(name: impl AsRef<str>) -> NodeBuilder {
        Self::builder(format!("displayname.{}", name.as_ref()))
    }

    /// A builder holding this node's properties.
    pub fn to_builder(&self) -> NodeBuilder {
        NodeBuilder {
            key: self.key.clone(),
            value: self.value,
            context: self.context.to_builder(),
            expiry: self.expiry,
            origin: self.origin.clone(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> bool {
        self.value
    }

    pub fn context(&self) -> &ContextSet {
        &self.context
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    pub fn node_type(&self) -> &NodeType {
        &self.node_type
    }

    pub fn kind(&self) -> NodeKind {
        self.node_type.kind()
    }

    pub fn origin(&self) -> Option<&InheritanceOrigin> {
        self.origin.as_ref()
    }

    /// Group this node inherits, if it is an inheritance node.
    pub fn group_name(&self) -> Option<&str> {
        match &self.node_type {
            NodeType::Inheritance { group } => Some(group),
            _ => None,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.expiry.is_some()
    }

    pub fn has_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }

    pub fn has_expired(&self) -> bool {
        self.has_expired_at(Utc::now())
    }

    /// Same key and context; value and expiry may differ.
    pub fn equals_ignoring_value_and_expiry(&self, other: &Node) -> bool {
        self.key == other.key && self.context == other.context
    }

    /// Copy of this node stamped with the given origin.
    pub(crate) fn with_origin(&self, origin: InheritanceOrigin) -> Node {
        Node {
            origin: Some(origin),
            ..self.clone()
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.value == other.value
            && self.context == other.context
            && self.expiry == other.expiry
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.value.hash(state);
        self.context.hash(state);
        self.expiry.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)?;
        if !self.context.is_empty() {
            write!(f, " {}", self.context)?;
        }
        if let Some(expiry) = self.expiry {
            write!(f, " (expires {})", expiry.to_rfc3339())?;
        }
        Ok(())
    }
}

/// Builder for [`Node`].
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    key: String,
    value: bool,
    context: ContextSetBuilder,
    expiry: Option<DateTime<Utc>>,
    origin: Option<InheritanceOrigin>,
}

impl NodeBuilder {
    fn new(key: String) -> Self {
        Self {
            key,
            value: true,
            context: ContextSetBuilder::default(),
            expiry: None,
            origin: None,
        }
    }

    pub fn value(mut self, value: bool) -> Self {
        self.value = value;
        self
    }

    pub fn with_context(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.context = self.context.add(key, value);
        self
    }

    /// Adds every pair of `context`.
    pub fn context(mut self, context: &ContextSet) -> Self {
        self.context = self.context.add_all(context);
        self
    }

    pub fn expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Expires `duration` from now.
    pub fn expiry_after(self, duration: Duration) -> Self {
        self.expiry(Utc::now() + duration)
    }

    pub fn clear_expiry(mut self) -> Self {
        self.expiry = None;
        self
    }

    pub fn origin(mut self, origin: InheritanceOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn build(self) -> DomainResult<Node> {
        if self.key.trim().is_empty() {
            return Err(DomainError::InvalidNode {
                message: "node key cannot be empty".to_string(),
            });
        }
        let node_type = NodeType::parse(&self.key);
        let key = match node_type.canonical_key() {
            Some(canonical) => canonical,
            None if is_regex_key(&self.key) => self.key,
            None => self.key.to_lowercase(),
        };

        Ok(Node {
            key,
            value: self.value,
            context: self.context.build()?,
            expiry: self.expiry,
            node_type,
            origin: self.origin,
        })
    }
}

/// Regex permission keys (`r=...`/`R=...`) keep their pattern text as-is.
pub(crate) fn is_regex_key(key: &str) -> bool {
    key.len() > 2 && (key.starts_with("r=") || key.starts_with("R="))
}
