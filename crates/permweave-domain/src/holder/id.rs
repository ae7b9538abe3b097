//! Holder identities.

use std::fmt;

use uuid::Uuid;

/// Whether a holder is a user or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HolderType {
    User,
    Group,
}

/// Stable identity of a permission holder.
///
/// Groups are referenced by lower-cased name, users by UUID. Inheritance
/// edges store names, never pointers, and are resolved through the
/// registry at traversal time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HolderId {
    User(Uuid),
    Group(String),
}

impl HolderId {
    pub fn user(uuid: Uuid) -> Self {
        HolderId::User(uuid)
    }

    pub fn group(name: impl AsRef<str>) -> Self {
        HolderId::Group(name.as_ref().trim().to_lowercase())
    }

    pub fn holder_type(&self) -> HolderType {
        match self {
            HolderId::User(_) => HolderType::User,
            HolderId::Group(_) => HolderType::Group,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, HolderId::Group(_))
    }

    /// Group name, if this is a group.
    pub fn group_name(&self) -> Option<&str> {
        match self {
            HolderId::Group(name) => Some(name),
            HolderId::User(_) => None,
        }
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HolderId::User(uuid) => write!(f, "user:{uuid}"),
            HolderId::Group(name) => write!(f, "group:{name}"),
        }
    }
}
