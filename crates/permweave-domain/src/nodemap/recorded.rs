//! A [`NodeMap`] that remembers what changed since the last save.

use parking_lot::Mutex;

use super::{Difference, NodeMap};
use crate::context::{ContextSet, QueryOptions};
use crate::holder::HolderId;
use crate::node::{DataType, Node};

use chrono::{DateTime, Utc};

/// Wraps a [`NodeMap`] and merges the [`Difference`] of every mutation into
/// a pending change log.
///
/// Storage exports the log after a successful save, or discards it when
/// the map content is replaced by freshly loaded data.
#[derive(Debug)]
pub struct RecordedNodeMap {
    map: NodeMap,
    changes: Mutex<Difference>,
}

impl RecordedNodeMap {
    pub fn new(holder: HolderId) -> Self {
        Self {
            map: NodeMap::new(holder, DataType::Normal),
            changes: Mutex::new(Difference::new()),
        }
    }

    fn record(&self, diff: Difference) -> Difference {
        if !diff.is_empty() {
            self.changes.lock().merge_from(diff.clone());
        }
        diff
    }

    /// Read access to the wrapped map. Mutations must go through the
    /// recorder so they are logged.
    pub fn map(&self) -> &NodeMap {
        &self.map
    }

    /// Takes the pending changes if `only_if` accepts them, leaving an
    /// empty log behind. Rejected changes stay pending.
    pub fn export_changes<F>(&self, only_if: F) -> Option<Difference>
    where
        F: FnOnce(&Difference) -> bool,
    {
        let mut changes = self.changes.lock();
        if only_if(&changes) {
            Some(std::mem::take(&mut *changes))
        } else {
            None
        }
    }

    pub fn discard_changes(&self) {
        self.changes.lock().clear();
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.lock().is_empty()
    }

    /// Replaces the content without recording, for data that came from
    /// storage.
    pub fn load_content<I>(&self, nodes: I)
    where
        I: IntoIterator<Item = Node>,
    {
        let mut changes = self.changes.lock();
        self.map.set_content(nodes);
        changes.clear();
    }

    pub fn add(&self, node: Node) -> Difference {
        self.record(self.map.add(node))
    }

    pub fn add_all<I>(&self, nodes: I) -> Difference
    where
        I: IntoIterator<Item = Node>,
    {
        self.record(self.map.add_all(nodes))
    }

    pub fn remove(&self, node: &Node) -> Difference {
        self.record(self.map.remove(node))
    }

    pub fn remove_exact(&self, node: &Node) -> Difference {
        self.record(self.map.remove_exact(node))
    }

    pub fn remove_if<F>(&self, predicate: F) -> Difference
    where
        F: FnMut(&Node) -> bool,
    {
        self.record(self.map.remove_if(predicate))
    }

    pub fn remove_if_in_context<F>(&self, context: &ContextSet, predicate: F) -> Difference
    where
        F: FnMut(&Node) -> bool,
    {
        self.record(self.map.remove_if_in_context(context, predicate))
    }

    pub fn remove_expired(&self, now: DateTime<Utc>) -> Difference {
        self.record(self.map.remove_expired(now))
    }

    pub fn clear(&self) -> Difference {
        self.record(self.map.clear())
    }

    pub fn clear_context(&self, context: &ContextSet) -> Difference {
        self.record(self.map.clear_context(context))
    }

    pub fn set_content<I>(&self, nodes: I) -> Difference
    where
        I: IntoIterator<Item = Node>,
    {
        self.record(self.map.set_content(nodes))
    }

    pub fn as_list(&self) -> Vec<Node> {
        self.map.as_list()
    }

    pub fn for_each<F>(&self, query: &QueryOptions, consumer: F)
    where
        F: FnMut(&Node),
    {
        self.map.for_each(query, consumer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(key: &str) -> Node {
        Node::builder(key).build().unwrap()
    }

    fn recorded() -> RecordedNodeMap {
        RecordedNodeMap::new(HolderId::group("test"))
    }

    #[test]
    fn test_mutations_accumulate_net_changes() {
        // Arrange
        let map = recorded();

        // Act
        map.add(node("a"));
        map.add(node("b"));
        map.remove(&node("a"));

        // Assert
        let changes = map.export_changes(|_| true).unwrap();
        assert_eq!(changes.added(), &[node("b")]);
        assert!(changes.removed().is_empty());
        assert!(!map.has_changes());
    }

    #[test]
    fn test_rejected_export_keeps_changes_pending() {
        let map = recorded();
        map.add(node("a"));

        let exported = map.export_changes(|changes| changes.added().len() > 5);

        assert!(exported.is_none());
        assert!(map.has_changes());
    }

    #[test]
    fn test_loaded_content_is_not_recorded() {
        let map = recorded();
        map.add(node("local"));

        map.load_content(vec![node("a"), node("b")]);

        assert!(!map.has_changes());
        assert_eq!(map.as_list().len(), 2);
    }

    #[test]
    fn test_discard_changes_clears_log() {
        let map = recorded();
        map.add(node("a"));

        map.discard_changes();

        assert!(!map.has_changes());
        assert_eq!(map.as_list(), vec![node("a")]);
    }
}
