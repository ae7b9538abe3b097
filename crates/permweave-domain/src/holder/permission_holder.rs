//! Users and groups that own nodes.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use super::id::{HolderId, HolderType};
use super::registry::HolderRegistry;
use crate::cache::{CacheDataSource, CachedData};
use crate::calculator::{PermissionData, Tristate};
use crate::config::CachedDataConfig;
use crate::context::{Flag, QueryOptions};
use crate::metastack::MetaData;
use crate::node::{DataType, Node};
use crate::nodemap::{Difference, NodeMap, RecordedNodeMap};

/// A user or group: its normal and transient nodes plus the data cached
/// from resolving them.
///
/// Holders are created by a [`HolderRegistry`], which resolves inheritance
/// names to holders at traversal time.
pub struct PermissionHolder {
    id: HolderId,
    normal: RecordedNodeMap,
    transient: NodeMap,
    primary_group: RwLock<Option<String>>,
    cached: CachedData,
    registry: Weak<HolderRegistry>,
}

impl fmt::Debug for PermissionHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionHolder")
            .field("id", &self.id)
            .field("normal", &self.normal.map().size())
            .field("transient", &self.transient.size())
            .field("cached", &self.cached)
            .finish()
    }
}

impl PermissionHolder {
    pub(crate) fn new(
        id: HolderId,
        registry: Weak<HolderRegistry>,
        source: Arc<dyn CacheDataSource>,
        config: CachedDataConfig,
    ) -> Self {
        Self {
            normal: RecordedNodeMap::new(id.clone()),
            transient: NodeMap::new(id.clone(), DataType::Transient),
            primary_group: RwLock::new(None),
            cached: CachedData::new(source, config),
            registry,
            id,
        }
    }

    pub fn id(&self) -> &HolderId {
        &self.id
    }

    pub fn holder_type(&self) -> HolderType {
        self.id.holder_type()
    }

    /// Persisted nodes, with change recording for storage.
    pub fn normal_data(&self) -> &RecordedNodeMap {
        &self.normal
    }

    /// Session-only nodes, cleared when the holder is unloaded.
    pub fn transient_data(&self) -> &NodeMap {
        &self.transient
    }

    pub fn cached_data(&self) -> &CachedData {
        &self.cached
    }

    /// Explicitly chosen primary group, if any.
    pub fn primary_group(&self) -> Option<String> {
        self.primary_group.read().clone()
    }

    pub fn set_primary_group(&self, group: Option<&str>) {
        *self.primary_group.write() = group.map(|g| g.trim().to_lowercase());
        self.cached.invalidate_all_meta();
    }

    // ------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------

    /// Replaces the normal nodes with storage content without recording
    /// the change.
    pub fn load_nodes<I>(&self, nodes: I)
    where
        I: IntoIterator<Item = Node>,
    {
        self.normal.load_content(nodes);
        self.changed();
    }

    pub fn set_node(&self, node: Node) -> Difference {
        let result = self.normal.add(node);
        self.changed_if(&result)
    }

    /// Removes the node with the same key and context, whatever its value.
    pub fn unset_node(&self, node: &Node) -> Difference {
        let result = self.normal.remove(node);
        self.changed_if(&result)
    }

    pub fn unset_node_exact(&self, node: &Node) -> Difference {
        let result = self.normal.remove_exact(node);
        self.changed_if(&result)
    }

    pub fn set_transient_node(&self, node: Node) -> Difference {
        let result = self.transient.add(node);
        self.changed_if(&result)
    }

    pub fn unset_transient_node(&self, node: &Node) -> Difference {
        let result = self.transient.remove(node);
        self.changed_if(&result)
    }

    pub fn clear_nodes(&self) -> Difference {
        let result = self.normal.clear();
        self.changed_if(&result)
    }

    pub fn clear_transient_nodes(&self) -> Difference {
        let result = self.transient.clear();
        self.changed_if(&result)
    }

    /// Removes expired nodes from both maps.
    pub fn audit_temporary_nodes(&self) -> Difference {
        let now = Utc::now();
        let result = self
            .normal
            .remove_expired(now)
            .merge(self.transient.remove_expired(now));
        if !result.is_empty() {
            debug!(holder = %self.id, removed = result.removed().len(), "removed expired nodes");
        }
        self.changed_if(&result)
    }

    fn changed_if(&self, result: &Difference) -> Difference {
        if !result.is_empty() {
            self.changed();
        }
        result.clone()
    }

    /// Drops cached data. A group change may affect every holder that
    /// inherits it, so those are dropped too.
    fn changed(&self) {
        if self.id.is_group() {
            if let Some(registry) = self.registry.upgrade() {
                registry.invalidate_all_holders();
                return;
            }
        }
        self.cached.invalidate();
    }

    // ------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------

    /// Own normal nodes.
    pub fn nodes(&self) -> Vec<Node> {
        self.normal.as_list()
    }

    pub fn transient_nodes(&self) -> Vec<Node> {
        self.transient.as_list()
    }

    /// Own nodes (transient first) that apply to `query`.
    pub fn own_nodes(&self, query: &QueryOptions) -> Vec<Node> {
        let mut out = Vec::new();
        self.transient.copy_to(&mut out, query);
        self.normal.map().copy_to(&mut out, query);
        out
    }

    /// Own inheritance nodes (transient first) that may be followed
    /// under `query`.
    pub(crate) fn own_inheritance_nodes(&self, query: &QueryOptions) -> Vec<Node> {
        let mut out = Vec::new();
        if !query.flag(Flag::ResolveInheritance) {
            return out;
        }
        self.transient.copy_inheritance_nodes_to(&mut out, query);
        self.normal.map().copy_inheritance_nodes_to(&mut out, query);
        out
    }

    /// Whether this holder directly inherits `group` under `query`.
    pub fn inherits_group(&self, group: &str, query: &QueryOptions) -> bool {
        let group = group.trim().to_lowercase();
        let query = query.clone().with_flag(Flag::ResolveInheritance, true);
        self.own_inheritance_nodes(&query)
            .iter()
            .any(|node| !node.has_expired() && node.group_name() == Some(group.as_str()))
    }

    pub fn get_permission_data(&self, query: &QueryOptions) -> Arc<PermissionData> {
        self.cached.get_permission_data(query)
    }

    pub fn get_meta_data(&self, query: &QueryOptions) -> Arc<MetaData> {
        self.cached.get_meta_data_for(query)
    }

    /// Resolved value of `permission` under `query`.
    pub fn check_permission(&self, permission: &str, query: &QueryOptions) -> Tristate {
        self.get_permission_data(query)
            .get_permission_value(permission)
    }
}
