//! Change reports returned by node map mutations.

use crate::node::Node;

/// The nodes added and removed by one or more mutations.
///
/// Recording a change that undoes an earlier opposite change for the same
/// node cancels both, so merged differences describe the net effect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Difference {
    added: Vec<Node>,
    removed: Vec<Node>,
}

impl Difference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn added(&self) -> &[Node] {
        &self.added
    }

    pub fn removed(&self) -> &[Node] {
        &self.removed
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn record_add(&mut self, node: Node) {
        if let Some(pos) = self.removed.iter().position(|n| *n == node) {
            self.removed.remove(pos);
        } else if !self.added.contains(&node) {
            self.added.push(node);
        }
    }

    pub fn record_remove(&mut self, node: Node) {
        if let Some(pos) = self.added.iter().position(|n| *n == node) {
            self.added.remove(pos);
        } else if !self.removed.contains(&node) {
            self.removed.push(node);
        }
    }

    /// Applies `other`'s changes after this one's.
    pub fn merge(mut self, other: Difference) -> Self {
        self.merge_from(other);
        self
    }

    pub fn merge_from(&mut self, other: Difference) {
        for node in other.removed {
            self.record_remove(node);
        }
        for node in other.added {
            self.record_add(node);
        }
    }

    pub fn clear(&mut self) {
        self.added.clear();
        self.removed.clear();
    }
}
