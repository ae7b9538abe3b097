//! Lazy, cycle-safe traversal of the inheritance graph.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  successors()  ┌──────────────────────────┐
//! │   Graph    │ ◄───────────── │        Traversal         │
//! │ (registry) │                │  BFS / DFS pre / DFS post│
//! └────────────┘                │  visited set (by id)     │
//!                               └────────────┬─────────────┘
//!                                            │ optional
//!                                            ▼
//!                               ┌──────────────────────────┐
//!                               │ sort_by_weight (stable)  │
//!                               └──────────────────────────┘
//! ```
//!
//! The graph is never materialised. Each step asks the [`Graph`] for a
//! node's successors, which it must return already ordered (by descending
//! weight for holders) so traversal order is reproducible.

mod traversal;
mod traversal_proptest;

pub use traversal::{sort_by_weight, Graph, Traversal, TraversalAlgorithm};
