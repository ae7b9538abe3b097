//! Per-holder node storage, bucketed by context.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                       NodeMap                        │
//! ├──────────────────────────────────────────────────────┤
//! │  {server=a, world=b} → [node, node, ...]             │
//! │  {server=a}          → [node, ...]                   │
//! │  {world=b}           → [...]                         │
//! │  (global)            → [...]                         │
//! ├──────────────────────────────────────────────────────┤
//! │  inheritance subset  → value=true group.* nodes only │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Buckets are ordered most specific context first, so a flattening pass
//! that keeps the first value per key lets context-specific grants win over
//! global ones.
//!
//! Within a bucket at most one node exists per key: adding a node whose
//! key and context match an existing one (ignoring value and expiry)
//! replaces it and reports both sides in the returned [`Difference`].
//!
//! Mutations never touch caches. The owning holder triggers recalculation.

mod difference;
mod map_proptest;
mod recorded;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::context::{ContextSet, QueryOptions};
use crate::holder::HolderId;
use crate::node::{DataType, InheritanceOrigin, Node, NodeKind};

pub use difference::Difference;
pub use recorded::RecordedNodeMap;

/// Bucket key ordering contexts most specific first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Bucket(ContextSet);

impl Ord for Bucket {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.specificity_cmp(&self.0)
    }
}

impl PartialOrd for Bucket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<Bucket, Vec<Node>>,
    inheritance: BTreeMap<Bucket, Vec<Node>>,
}

impl Inner {
    fn add(&mut self, node: Node, result: &mut Difference) {
        let bucket = Bucket(node.context().clone());
        let nodes = self.nodes.entry(bucket.clone()).or_default();

        if nodes.iter().any(|existing| *existing == node) {
            return;
        }

        nodes.retain(|existing| {
            if existing.equals_ignoring_value_and_expiry(&node) {
                result.record_remove(existing.clone());
                false
            } else {
                true
            }
        });
        result.record_add(node.clone());

        let pos = nodes
            .binary_search_by(|existing| bucket_order(existing, &node))
            .unwrap_or_else(|pos| pos);
        nodes.insert(pos, node);

        self.sync_bucket(&bucket);
    }

    fn remove_where<F>(&mut self, context: &ContextSet, mut predicate: F, result: &mut Difference)
    where
        F: FnMut(&Node) -> bool,
    {
        let bucket = Bucket(context.clone());
        let Some(nodes) = self.nodes.get_mut(&bucket) else {
            return;
        };
        nodes.retain(|existing| {
            if predicate(existing) {
                result.record_remove(existing.clone());
                false
            } else {
                true
            }
        });
        self.sync_bucket(&bucket);
    }

    /// Rebuilds the inheritance subset of one bucket and drops empty buckets.
    fn sync_bucket(&mut self, bucket: &Bucket) {
        let inheritance: Vec<Node> = match self.nodes.get(bucket) {
            Some(nodes) if nodes.is_empty() => {
                self.nodes.remove(bucket);
                Vec::new()
            }
            Some(nodes) => nodes
                .iter()
                .filter(|n| n.kind() == NodeKind::Inheritance && n.value())
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        if inheritance.is_empty() {
            self.inheritance.remove(bucket);
        } else {
            self.inheritance.insert(bucket.clone(), inheritance);
        }
    }

    fn clear(&mut self, result: &mut Difference) {
        for node in std::mem::take(&mut self.nodes).into_values().flatten() {
            result.record_remove(node);
        }
        self.inheritance.clear();
    }
}

/// Temporary nodes sort before permanent ones, then by key.
fn bucket_order(a: &Node, b: &Node) -> Ordering {
    b.is_temporary()
        .cmp(&a.is_temporary())
        .then_with(|| a.key().cmp(b.key()))
}

/// A holder's nodes of one [`DataType`].
#[derive(Debug)]
pub struct NodeMap {
    holder: HolderId,
    data_type: DataType,
    inner: RwLock<Inner>,
}

impl NodeMap {
    pub fn new(holder: HolderId, data_type: DataType) -> Self {
        Self {
            holder,
            data_type,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    fn stamp_origin(&self, node: Node) -> Node {
        match node.origin() {
            Some(origin) if origin.holder == self.holder && origin.data_type == self.data_type => {
                node
            }
            _ => node.with_origin(InheritanceOrigin::new(self.holder.clone(), self.data_type)),
        }
    }

    // ------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------

    /// Adds a node, replacing any node with the same key and context.
    ///
    /// Adding a node that is already present is a no-op.
    pub fn add(&self, node: Node) -> Difference {
        let node = self.stamp_origin(node);
        let mut result = Difference::new();
        self.inner.write().add(node, &mut result);
        result
    }

    pub fn add_all<I>(&self, nodes: I) -> Difference
    where
        I: IntoIterator<Item = Node>,
    {
        let mut result = Difference::new();
        let mut inner = self.inner.write();
        for node in nodes {
            inner.add(self.stamp_origin(node), &mut result);
        }
        result
    }

    /// Removes every node with the same key and context, whatever its
    /// value or expiry.
    pub fn remove(&self, node: &Node) -> Difference {
        let mut result = Difference::new();
        self.inner.write().remove_where(
            node.context(),
            |existing| existing.equals_ignoring_value_and_expiry(node),
            &mut result,
        );
        result
    }

    /// Removes only a node equal to `node` (value and expiry included).
    pub fn remove_exact(&self, node: &Node) -> Difference {
        let mut result = Difference::new();
        self.inner
            .write()
            .remove_where(node.context(), |existing| existing == node, &mut result);
        result
    }

    pub fn remove_if<F>(&self, mut predicate: F) -> Difference
    where
        F: FnMut(&Node) -> bool,
    {
        let mut result = Difference::new();
        let mut inner = self.inner.write();
        let contexts: Vec<ContextSet> = inner.nodes.keys().map(|b| b.0.clone()).collect();
        for context in contexts {
            inner.remove_where(&context, &mut predicate, &mut result);
        }
        result
    }

    pub fn remove_if_in_context<F>(&self, context: &ContextSet, predicate: F) -> Difference
    where
        F: FnMut(&Node) -> bool,
    {
        let mut result = Difference::new();
        self.inner.write().remove_where(context, predicate, &mut result);
        result
    }

    /// Removes nodes whose expiry has passed.
    pub fn remove_expired(&self, now: DateTime<Utc>) -> Difference {
        self.remove_if(|node| node.has_expired_at(now))
    }

    pub fn clear(&self) -> Difference {
        let mut result = Difference::new();
        self.inner.write().clear(&mut result);
        result
    }

    pub fn clear_context(&self, context: &ContextSet) -> Difference {
        self.remove_if_in_context(context, |_| true)
    }

    /// Replaces the whole content in one step.
    pub fn set_content<I>(&self, nodes: I) -> Difference
    where
        I: IntoIterator<Item = Node>,
    {
        let mut result = Difference::new();
        let mut inner = self.inner.write();
        inner.clear(&mut result);
        for node in nodes {
            inner.add(self.stamp_origin(node), &mut result);
        }
        result
    }

    // ------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------

    pub fn size(&self) -> usize {
        self.inner.read().nodes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().nodes.is_empty()
    }

    /// Snapshot of every node, most specific context first.
    pub fn as_list(&self) -> Vec<Node> {
        self.inner.read().nodes.values().flatten().cloned().collect()
    }

    /// Snapshot of the value=true inheritance nodes.
    pub fn inheritance_as_list(&self) -> Vec<Node> {
        self.inner
            .read()
            .inheritance
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    pub fn nodes_in_context(&self, context: &ContextSet) -> Vec<Node> {
        self.inner
            .read()
            .nodes
            .get(&Bucket(context.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Visits every node that applies to `query`.
    ///
    /// A bucket whose normal nodes are excluded by the query flags still
    /// contributes its inheritance nodes when the inheritance flags allow it.
    pub fn for_each<F>(&self, query: &QueryOptions, mut consumer: F)
    where
        F: FnMut(&Node),
    {
        let inner = self.inner.read();
        for (bucket, nodes) in &inner.nodes {
            if !query.satisfies(&bucket.0) {
                continue;
            }
            if query.excludes_normal_nodes(&bucket.0) {
                if query.includes_inheritance_nodes(&bucket.0) {
                    if let Some(inheritance) = inner.inheritance.get(bucket) {
                        inheritance.iter().for_each(&mut consumer);
                    }
                }
            } else {
                nodes.iter().for_each(&mut consumer);
            }
        }
    }

    pub fn copy_to(&self, out: &mut Vec<Node>, query: &QueryOptions) {
        self.for_each(query, |node| out.push(node.clone()));
    }

    /// Copies the inheritance nodes that `query` allows following.
    pub fn copy_inheritance_nodes_to(&self, out: &mut Vec<Node>, query: &QueryOptions) {
        let inner = self.inner.read();
        for (bucket, nodes) in &inner.inheritance {
            if query.satisfies(&bucket.0) && query.includes_inheritance_nodes(&bucket.0) {
                out.extend(nodes.iter().cloned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextSatisfyMode, Flag, QueryFlags};
    use chrono::Duration;

    fn holder() -> HolderId {
        HolderId::group("test")
    }

    fn new_map() -> NodeMap {
        NodeMap::new(holder(), DataType::Normal)
    }

    fn node(key: &str) -> Node {
        Node::builder(key).build().unwrap()
    }

    /// Eight nodes: four permissions and four inheritance nodes across the
    /// global, server, world and server+world contexts.
    fn populated_map() -> NodeMap {
        let map = new_map();
        for prefix in ["test", "group.test"] {
            map.add(node(&format!("{prefix}1")));
            map.add(
                Node::builder(format!("{prefix}2"))
                    .with_context("server", "test")
                    .build()
                    .unwrap(),
            );
            map.add(
                Node::builder(format!("{prefix}3"))
                    .with_context("world", "test")
                    .build()
                    .unwrap(),
            );
            map.add(
                Node::builder(format!("{prefix}4"))
                    .with_context("server", "test")
                    .with_context("world", "test")
                    .build()
                    .unwrap(),
            );
        }
        map
    }

    // ============================================================
    // Section 1: Add and remove
    // ============================================================

    #[test]
    fn test_simple_add_and_remove() {
        // Arrange
        let map = new_map();
        let n = node("test");

        // Act
        let added = map.add(n.clone());

        // Assert
        assert_eq!(added.added(), &[n.clone()]);
        assert!(added.removed().is_empty());
        assert_eq!(map.size(), 1);

        let removed = map.remove(&n);
        assert!(removed.added().is_empty());
        assert_eq!(removed.removed(), &[n]);
        assert_eq!(map.size(), 0);
        assert!(map.is_empty());
    }

    #[test]
    fn test_adding_same_node_twice_is_idempotent() {
        let map = new_map();
        let n = node("test");

        map.add(n.clone());
        let before = map.as_list();
        let second = map.add(n);

        assert!(second.is_empty());
        assert_eq!(map.as_list(), before);
    }

    #[test]
    fn test_added_nodes_carry_holder_origin() {
        let map = new_map();
        map.add(node("test"));

        let nodes = map.as_list();
        let origin = nodes[0].origin().unwrap();

        assert_eq!(origin.holder, holder());
        assert_eq!(origin.data_type, DataType::Normal);
    }

    #[test]
    fn test_add_replaces_node_with_different_value() {
        for key in ["test", "group.test"] {
            for (first_value, second_value) in [(true, false), (false, true)] {
                // Arrange
                let map = new_map();
                let first = Node::builder(key).value(first_value).build().unwrap();
                let second = Node::builder(key).value(second_value).build().unwrap();
                map.add(first.clone());

                // Act
                let diff = map.add(second.clone());

                // Assert
                assert_eq!(diff.removed(), &[first]);
                assert_eq!(diff.added(), &[second.clone()]);
                assert_eq!(map.as_list(), vec![second.clone()]);
                if second.kind() == NodeKind::Inheritance && second.value() {
                    assert_eq!(map.inheritance_as_list(), vec![second]);
                } else {
                    assert!(map.inheritance_as_list().is_empty());
                }
            }
        }
    }

    #[test]
    fn test_add_replaces_node_with_different_expiry() {
        for key in ["test", "group.test"] {
            let map = new_map();
            let first = Node::builder(key)
                .expiry_after(Duration::days(1))
                .build()
                .unwrap();
            let second = Node::builder(key)
                .expiry_after(Duration::days(5))
                .build()
                .unwrap();
            map.add(first.clone());

            let diff = map.add(second.clone());

            assert_eq!(diff.removed(), &[first]);
            assert_eq!(diff.added(), &[second.clone()]);
            assert_eq!(map.size(), 1);
            if second.kind() == NodeKind::Inheritance {
                assert_eq!(map.inheritance_as_list(), vec![second]);
            }
        }
    }

    #[test]
    fn test_remove_ignores_value_and_expiry_but_not_context() {
        // Arrange
        let map = new_map();
        map.add(node("test1"));
        map.add(Node::builder("test2").value(false).build().unwrap());
        map.add(Node::builder("test3").expiry_after(Duration::hours(1)).build().unwrap());
        map.add(Node::builder("test4").with_context("hello", "world").build().unwrap());
        assert_eq!(map.size(), 4);

        // Act - none of these match on context
        map.remove(&Node::builder("test1").with_context("hello", "world").build().unwrap());
        map.remove(&node("test4"));
        map.remove(
            &Node::builder("test4")
                .with_context("hello", "world")
                .with_context("aaa", "bbb")
                .build()
                .unwrap(),
        );
        map.remove(&node("test5"));

        // Assert
        assert_eq!(map.size(), 4);

        map.remove(&node("test1"));
        map.remove(&Node::builder("test2").value(true).build().unwrap());
        map.remove(&Node::builder("test3").expiry_after(Duration::hours(2)).build().unwrap());
        map.remove(&Node::builder("test4").with_context("hello", "world").build().unwrap());
        assert_eq!(map.size(), 0);
    }

    #[test]
    fn test_remove_exact_requires_exact_match() {
        // Arrange
        let map = new_map();
        let expiry = Utc::now() + Duration::hours(1);
        map.add(node("test1"));
        map.add(Node::builder("test2").value(false).build().unwrap());
        map.add(Node::builder("test3").expiry(expiry).build().unwrap());
        map.add(Node::builder("test4").with_context("hello", "world").build().unwrap());

        // Act
        map.remove_exact(&Node::builder("test2").value(true).build().unwrap());
        map.remove_exact(&Node::builder("test3").expiry(expiry + Duration::hours(1)).build().unwrap());
        map.remove_exact(&node("test3"));
        map.remove_exact(&node("test4"));

        // Assert
        assert_eq!(map.size(), 4);

        map.remove_exact(&node("test1"));
        map.remove_exact(&Node::builder("test2").value(false).build().unwrap());
        map.remove_exact(&Node::builder("test3").expiry(expiry).build().unwrap());
        map.remove_exact(&Node::builder("test4").with_context("hello", "world").build().unwrap());
        assert_eq!(map.size(), 0);
    }

    #[test]
    fn test_negated_inheritance_node_is_not_in_inheritance_subset() {
        let map = new_map();
        map.add(Node::inheritance("admin").value(false).build().unwrap());

        assert_eq!(map.size(), 1);
        assert!(map.inheritance_as_list().is_empty());
    }

    #[test]
    fn test_remove_expired_drops_only_expired_nodes() {
        let map = new_map();
        let now = Utc::now();
        map.add(Node::builder("old").expiry(now - Duration::seconds(1)).build().unwrap());
        map.add(Node::builder("fresh").expiry(now + Duration::hours(1)).build().unwrap());
        map.add(node("permanent"));

        let diff = map.remove_expired(now);

        assert_eq!(diff.removed().len(), 1);
        assert_eq!(diff.removed()[0].key(), "old");
        assert_eq!(map.size(), 2);
    }

    #[test]
    fn test_set_content_replaces_everything() {
        let map = new_map();
        map.add(node("a"));
        map.add(node("b"));

        let diff = map.set_content(vec![node("b"), node("c")]);

        assert_eq!(diff.removed(), &[node("a")]);
        assert_eq!(diff.added(), &[node("c")]);
        assert_eq!(map.size(), 2);
    }

    #[test]
    fn test_clear_context_only_touches_that_bucket() {
        let map = populated_map();
        let server = ContextSet::of("server", "test").unwrap();

        let diff = map.clear_context(&server);

        assert_eq!(diff.removed().len(), 2);
        assert_eq!(map.size(), 6);
        assert_eq!(map.inheritance_as_list().len(), 3);
    }

    // ============================================================
    // Section 2: Ordering
    // ============================================================

    #[test]
    fn test_most_specific_context_comes_first() {
        let map = populated_map();

        let keys: Vec<String> = map
            .as_list()
            .into_iter()
            .filter(|n| n.kind() == NodeKind::Permission)
            .map(|n| n.key().to_string())
            .collect();

        assert_eq!(keys, vec!["test4", "test2", "test3", "test1"]);
    }

    #[test]
    fn test_temporary_nodes_sort_first_within_a_bucket() {
        let map = new_map();
        map.add(node("a"));
        map.add(Node::builder("z").expiry_after(Duration::hours(1)).build().unwrap());

        let keys: Vec<String> = map.as_list().iter().map(|n| n.key().to_string()).collect();

        assert_eq!(keys, vec!["z", "a"]);
    }

    // ============================================================
    // Section 3: Query filtering
    // ============================================================

    #[test]
    fn test_flags_filtering() {
        let cases = [
            (true, true, true, true, 8, 4),
            (true, true, false, false, 8, 1),
            (false, true, true, true, 6, 4),
            (true, false, true, true, 6, 4),
            (false, false, true, true, 5, 4),
            (false, true, false, true, 4, 2),
            (true, false, true, false, 4, 2),
            (false, false, false, false, 2, 1),
        ];
        let map = populated_map();

        for (s, w, is, iw, expected, expected_inheritance) in cases {
            // Arrange
            let flags = QueryFlags::none()
                .with(Flag::IncludeNodesWithoutServerContext, s)
                .with(Flag::IncludeNodesWithoutWorldContext, w)
                .with(Flag::ApplyInheritanceNodesWithoutServerContext, is)
                .with(Flag::ApplyInheritanceNodesWithoutWorldContext, iw);
            let query = QueryOptions::non_contextual()
                .with_flags(flags)
                .with_satisfy_mode(ContextSatisfyMode::AtLeastOneValuePerKey);

            // Act
            let mut copied = Vec::new();
            map.copy_to(&mut copied, &query);
            let mut visited = 0;
            map.for_each(&query, |_| visited += 1);
            let mut inheritance = Vec::new();
            map.copy_inheritance_nodes_to(&mut inheritance, &query);

            // Assert
            assert_eq!(copied.len(), expected, "s={s} w={w} is={is} iw={iw}");
            assert_eq!(visited, expected, "s={s} w={w} is={is} iw={iw}");
            assert_eq!(
                inheritance.len(),
                expected_inheritance,
                "s={s} w={w} is={is} iw={iw}"
            );
        }
    }

    #[test]
    fn test_context_filtering() {
        let cases: [(&[(&str, &str)], usize, usize); 5] = [
            (&[], 2, 1),
            (&[("server", "test")], 4, 2),
            (&[("world", "test")], 4, 2),
            (&[("server", "test"), ("world", "test")], 8, 4),
            (&[("server", "test"), ("world", "test"), ("test", "test")], 8, 4),
        ];
        let map = populated_map();

        for (pairs, expected, expected_inheritance) in cases {
            let contexts = ContextSet::from_pairs(pairs.iter().copied()).unwrap();
            let query = QueryOptions::contextual(contexts.clone())
                .with_satisfy_mode(ContextSatisfyMode::AtLeastOneValuePerKey);

            let mut copied = Vec::new();
            map.copy_to(&mut copied, &query);
            let mut inheritance = Vec::new();
            map.copy_inheritance_nodes_to(&mut inheritance, &query);

            assert_eq!(copied.len(), expected, "contexts={contexts}");
            assert_eq!(inheritance.len(), expected_inheritance, "contexts={contexts}");
        }
    }
}
