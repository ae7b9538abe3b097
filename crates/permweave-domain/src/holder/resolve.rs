//! Inheritance resolution: walking a holder's groups and flattening
//! their nodes.

use std::cmp::Reverse;
use std::sync::Arc;

use chrono::Utc;

use super::id::HolderId;
use super::permission_holder::PermissionHolder;
use super::registry::HolderRegistry;
use crate::calculator::PermissionMap;
use crate::context::{ContextSet, QueryOptions};
use crate::error::DomainResult;
use crate::graph::{sort_by_weight, Graph};
use crate::metastack::MetaAccumulator;
use crate::node::{Node, NodeType};

/// The inheritance graph as seen by one query.
///
/// Successors are the groups named by a holder's followable, unexpired,
/// value=true inheritance nodes that are currently loaded, heaviest first
/// and then by name.
pub struct InheritanceGraph<'a> {
    registry: &'a HolderRegistry,
    query: &'a QueryOptions,
}

impl<'a> InheritanceGraph<'a> {
    pub fn new(registry: &'a HolderRegistry, query: &'a QueryOptions) -> Self {
        Self { registry, query }
    }
}

impl Graph for InheritanceGraph<'_> {
    type Node = HolderId;

    fn successors(&self, node: &HolderId) -> Vec<HolderId> {
        let Some(holder) = self.registry.holder(node) else {
            return Vec::new();
        };
        let now = Utc::now();

        let mut groups: Vec<(i32, String)> = Vec::new();
        for inheritance in holder.own_inheritance_nodes(self.query) {
            if inheritance.has_expired_at(now) {
                continue;
            }
            let Some(name) = inheritance.group_name() else {
                continue;
            };
            if groups.iter().any(|(_, existing)| existing == name) {
                continue;
            }
            if let Some(group) = self.registry.group(name) {
                groups.push((self.registry.holder_weight(&group), name.to_string()));
            }
        }

        groups.sort_by(|a, b| Reverse(a.0).cmp(&Reverse(b.0)).then_with(|| a.1.cmp(&b.1)));
        groups
            .into_iter()
            .map(|(_, name)| HolderId::Group(name))
            .collect()
    }
}

impl HolderRegistry {
    /// Weight of a holder: its highest global `weight.N` node, else the
    /// configured fallback for its group name, else 0. Users weigh 0.
    pub fn holder_weight(&self, holder: &PermissionHolder) -> i32 {
        let Some(name) = holder.id().group_name() else {
            return 0;
        };
        let global = ContextSet::empty();
        let mut own = holder.transient_data().nodes_in_context(&global);
        own.extend(holder.normal_data().map().nodes_in_context(&global));

        own.iter()
            .filter(|node| node.value() && !node.has_expired())
            .filter_map(|node| match node.node_type() {
                NodeType::Weight { weight } => Some(*weight),
                _ => None,
            })
            .max()
            .or_else(|| self.resolution().group_weights.get(name).copied())
            .unwrap_or(0)
    }

    fn weight_of(&self, id: &HolderId) -> i32 {
        self.holder(id)
            .map(|holder| self.holder_weight(&holder))
            .unwrap_or(0)
    }

    /// Holders visited when resolving `holder` under `query`, the holder
    /// itself included, in resolution order.
    pub fn inheritance_order(
        &self,
        holder: &PermissionHolder,
        query: &QueryOptions,
    ) -> Vec<Arc<PermissionHolder>> {
        let start = holder.id().clone();
        let graph = InheritanceGraph::new(self, query);
        let mut order: Vec<HolderId> = self
            .resolution()
            .inheritance_traversal_algorithm
            .traverse(&graph, start.clone())
            .collect();

        if self.resolution().post_traversal_inheritance_sort {
            sort_by_weight(&mut order, &start, |id| self.weight_of(id));
        }

        order.iter().filter_map(|id| self.holder(id)).collect()
    }

    /// Every node applying to `query` from the holder and the groups it
    /// inherits, in resolution order. Each holder contributes its
    /// transient nodes before its normal ones.
    pub fn resolve_inherited_nodes(
        &self,
        holder: &PermissionHolder,
        query: &QueryOptions,
    ) -> Vec<Node> {
        self.inheritance_order(holder, query)
            .iter()
            .flat_map(|h| h.own_nodes(query))
            .collect()
    }

    /// Flattens resolved nodes to `permission → value`. The first node
    /// for a key wins; expired nodes are skipped.
    pub fn export_permissions(&self, holder: &PermissionHolder, query: &QueryOptions) -> PermissionMap {
        let now = Utc::now();
        let mut map = PermissionMap::new();
        for node in self.resolve_inherited_nodes(holder, query) {
            if node.has_expired_at(now) {
                continue;
            }
            map.entry(node.key().to_string()).or_insert(node.value());
        }
        map
    }

    /// Feeds meta, prefix and suffix nodes, group weights and the primary
    /// group into `accumulator`. Does not complete it.
    pub fn accumulate_meta(
        &self,
        holder: &PermissionHolder,
        accumulator: &mut MetaAccumulator,
        query: &QueryOptions,
    ) -> DomainResult<()> {
        let now = Utc::now();
        for visited in self.inheritance_order(holder, query) {
            for node in visited.own_nodes(query) {
                if node.value() && !node.has_expired_at(now) {
                    accumulator.accumulate_node(&node)?;
                }
            }
            if visited.id().is_group() {
                accumulator.accumulate_weight(self.holder_weight(&visited))?;
            }
        }

        if !holder.id().is_group() {
            let primary = holder
                .primary_group()
                .unwrap_or_else(|| self.resolution().default_primary_group.clone());
            accumulator.set_primary_group(primary)?;
        }
        Ok(())
    }

    /// Whether `holder` inherits `group` anywhere in its resolved tree.
    pub fn inherits_group_transitively(
        &self,
        holder: &PermissionHolder,
        group: &str,
        query: &QueryOptions,
    ) -> bool {
        let target = HolderId::group(group);
        if holder.id() == &target {
            return false;
        }
        self.inheritance_order(holder, query)
            .iter()
            .any(|h| h.id() == &target)
    }
}
