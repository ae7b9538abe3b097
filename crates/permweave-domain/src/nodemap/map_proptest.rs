//! Property-based tests for NodeMap.
