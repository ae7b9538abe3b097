//! Property-based tests for graph traversal.
