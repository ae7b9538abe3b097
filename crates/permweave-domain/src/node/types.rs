//! Node type tags derived from node keys.

use std::fmt;

pub(crate) const GROUP_PREFIX: &str = "group.";
pub(crate) const PREFIX_PREFIX: &str = "prefix.";
pub(crate) const SUFFIX_PREFIX: &str = "suffix.";
pub(crate) const META_PREFIX: &str = "meta.";
pub(crate) const WEIGHT_PREFIX: &str = "weight.";
pub(crate) const DISPLAY_NAME_PREFIX: &str = "displayname.";

/// Meta key under which the accumulated weight is published.
pub const WEIGHT_META_KEY: &str = "weight";
/// Meta key under which a user's primary group is published.
pub const PRIMARY_GROUP_META_KEY: &str = "primarygroup";

/// What a node grants.
///
/// Parsed once from the node key when the node is built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// A plain (possibly wildcard or regex) permission.
    Permission,
    /// Membership of a group.
    Inheritance { group: String },
    Prefix { priority: i32, value: String },
    Suffix { priority: i32, value: String },
    Meta { key: String, value: String },
    Weight { weight: i32 },
    DisplayName { name: String },
}

/// Discriminant of [`NodeType`] for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Permission,
    Inheritance,
    Prefix,
    Suffix,
    Meta,
    Weight,
    DisplayName,
}

/// Prefix or suffix, the two chat meta kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatMetaType {
    Prefix,
    Suffix,
}

impl fmt::Display for ChatMetaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatMetaType::Prefix => write!(f, "prefix"),
            ChatMetaType::Suffix => write!(f, "suffix"),
        }
    }
}

impl NodeType {
    /// Determines the type of a key. Malformed typed keys are permissions.
    pub fn parse(key: &str) -> NodeType {
        if let Some(group) = strip_prefix_ignore_case(key, GROUP_PREFIX) {
            if !group.is_empty() {
                return NodeType::Inheritance {
                    group: group.to_lowercase(),
                };
            }
        }
        if let Some(rest) = strip_prefix_ignore_case(key, PREFIX_PREFIX) {
            if let Some((priority, value)) = parse_chat_meta(rest) {
                return NodeType::Prefix { priority, value };
            }
        }
        if let Some(rest) = strip_prefix_ignore_case(key, SUFFIX_PREFIX) {
            if let Some((priority, value)) = parse_chat_meta(rest) {
                return NodeType::Suffix { priority, value };
            }
        }
        if let Some(rest) = strip_prefix_ignore_case(key, META_PREFIX) {
            if let Some((meta_key, value)) = rest.split_once('.') {
                if !meta_key.is_empty() {
                    return NodeType::Meta {
                        key: meta_key.to_lowercase(),
                        value: value.to_string(),
                    };
                }
            }
        }
        if let Some(rest) = strip_prefix_ignore_case(key, WEIGHT_PREFIX) {
            if let Ok(weight) = rest.parse::<i32>() {
                return NodeType::Weight { weight };
            }
        }
        if let Some(name) = strip_prefix_ignore_case(key, DISPLAY_NAME_PREFIX) {
            if !name.is_empty() {
                return NodeType::DisplayName {
                    name: name.to_string(),
                };
            }
        }
        NodeType::Permission
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeType::Permission => NodeKind::Permission,
            NodeType::Inheritance { .. } => NodeKind::Inheritance,
            NodeType::Prefix { .. } => NodeKind::Prefix,
            NodeType::Suffix { .. } => NodeKind::Suffix,
            NodeType::Meta { .. } => NodeKind::Meta,
            NodeType::Weight { .. } => NodeKind::Weight,
            NodeType::DisplayName { .. } => NodeKind::DisplayName,
        }
    }

    /// Priority and value of a prefix/suffix node of the given type.
    pub fn chat_meta(&self, kind: ChatMetaType) -> Option<(i32, &str)> {
        match (self, kind) {
            (NodeType::Prefix { priority, value }, ChatMetaType::Prefix)
            | (NodeType::Suffix { priority, value }, ChatMetaType::Suffix) => {
                Some((*priority, value.as_str()))
            }
            _ => None,
        }
    }

    /// Canonical key text for this type, if it is not a plain permission.
    pub(crate) fn canonical_key(&self) -> Option<String> {
        match self {
            NodeType::Permission => None,
            NodeType::Inheritance { group } => Some(format!("{GROUP_PREFIX}{group}")),
            NodeType::Prefix { priority, value } => {
                Some(format!("{PREFIX_PREFIX}{priority}.{value}"))
            }
            NodeType::Suffix { priority, value } => {
                Some(format!("{SUFFIX_PREFIX}{priority}.{value}"))
            }
            NodeType::Meta { key, value } => Some(format!("{META_PREFIX}{key}.{value}")),
            NodeType::Weight { weight } => Some(format!("{WEIGHT_PREFIX}{weight}")),
            NodeType::DisplayName { name } => Some(format!("{DISPLAY_NAME_PREFIX}{name}")),
        }
    }
}

fn strip_prefix_ignore_case<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    if key.len() >= prefix.len()
        && key.is_char_boundary(prefix.len())
        && key[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&key[prefix.len()..])
    } else {
        None
    }
}

fn parse_chat_meta(rest: &str) -> Option<(i32, String)> {
    let (priority, value) = rest.split_once('.')?;
    let priority = priority.parse::<i32>().ok()?;
    Some((priority, value.to_string()))
}
