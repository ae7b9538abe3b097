//! Traversal algorithms.

use std::cmp::Reverse;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::vec;

/// A directed graph defined by its successor function.
pub trait Graph {
    type Node: Clone + Eq + Hash;

    /// Direct successors of `node`, in the order they should be visited.
    fn successors(&self, node: &Self::Node) -> Vec<Self::Node>;
}

/// Order in which the inheritance graph is walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TraversalAlgorithm {
    /// Level order.
    BreadthFirst,
    /// A node before its children, highest weight subtree first.
    #[default]
    DepthFirstPreOrder,
    /// Children before the node.
    DepthFirstPostOrder,
}

impl TraversalAlgorithm {
    /// Parses the configuration spelling (`breadth-first`, ...).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "breadth-first" => Some(Self::BreadthFirst),
            "depth-first-pre-order" => Some(Self::DepthFirstPreOrder),
            "depth-first-post-order" => Some(Self::DepthFirstPostOrder),
            _ => None,
        }
    }

    /// Starts a lazy traversal at `start`. The start node is yielded too.
    pub fn traverse<G: Graph>(self, graph: &G, start: G::Node) -> Traversal<'_, G> {
        let mut visited = HashSet::new();
        let state = match self {
            TraversalAlgorithm::BreadthFirst => {
                visited.insert(start.clone());
                State::BreadthFirst(VecDeque::from([start]))
            }
            TraversalAlgorithm::DepthFirstPreOrder => {
                State::PreOrder(vec![vec![start].into_iter()])
            }
            TraversalAlgorithm::DepthFirstPostOrder => {
                visited.insert(start.clone());
                let children = graph.successors(&start).into_iter();
                State::PostOrder(vec![(start, children)])
            }
        };
        Traversal {
            graph,
            visited,
            state,
        }
    }
}

impl fmt::Display for TraversalAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraversalAlgorithm::BreadthFirst => write!(f, "breadth-first"),
            TraversalAlgorithm::DepthFirstPreOrder => write!(f, "depth-first-pre-order"),
            TraversalAlgorithm::DepthFirstPostOrder => write!(f, "depth-first-post-order"),
        }
    }
}

enum State<N> {
    /// Nodes are marked visited when enqueued.
    BreadthFirst(VecDeque<N>),
    /// Stack of sibling iterators; nodes are marked visited when yielded.
    PreOrder(Vec<vec::IntoIter<N>>),
    /// Stack of (node, remaining children); nodes are marked visited when
    /// entered and yielded when their children are exhausted.
    PostOrder(Vec<(N, vec::IntoIter<N>)>),
}

/// A finite, single-use traversal. Each node is yielded at most once, so
/// cycles terminate.
pub struct Traversal<'g, G: Graph> {
    graph: &'g G,
    visited: HashSet<G::Node>,
    state: State<G::Node>,
}

impl<G: Graph> Iterator for Traversal<'_, G> {
    type Item = G::Node;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.state {
            State::BreadthFirst(queue) => {
                let node = queue.pop_front()?;
                for child in self.graph.successors(&node) {
                    if self.visited.insert(child.clone()) {
                        queue.push_back(child);
                    }
                }
                Some(node)
            }
            State::PreOrder(stack) => loop {
                let siblings = stack.last_mut()?;
                match siblings.next() {
                    Some(node) => {
                        if self.visited.insert(node.clone()) {
                            stack.push(self.graph.successors(&node).into_iter());
                            return Some(node);
                        }
                    }
                    None => {
                        stack.pop();
                    }
                }
            },
            State::PostOrder(stack) => loop {
                let (_, children) = stack.last_mut()?;
                match children.next() {
                    Some(child) => {
                        if self.visited.insert(child.clone()) {
                            let grandchildren = self.graph.successors(&child).into_iter();
                            stack.push((child, grandchildren));
                        }
                    }
                    None => return stack.pop().map(|(node, _)| node),
                }
            },
        }
    }
}

/// Stable re-sort of a traversal by descending weight, keeping `start`
/// first if it is present.
pub fn sort_by_weight<N, F>(nodes: &mut [N], start: &N, weight: F)
where
    N: PartialEq,
    F: Fn(&N) -> i32,
{
    nodes.sort_by_key(|node| (node != start, Reverse(weight(node))));
}
