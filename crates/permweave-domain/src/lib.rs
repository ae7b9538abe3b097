//! permweave-domain: Permission and meta resolution core
//!
//! This crate resolves what a user or group is allowed to do and which
//! meta (prefixes, suffixes, key/value data) applies to them:
//! - Contexts and query options selecting which nodes apply
//! - Per-holder node maps with change reporting
//! - Inheritance graph traversal with deterministic, weight-ordered output
//! - Permission calculators with pluggable processors
//! - Meta accumulation and prefix/suffix stacking
//! - Per-holder cached data with soft and hard refresh
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │                 permweave-domain                  │
//! ├───────────────────────────────────────────────────┤
//! │  context/    - ContextSet, QueryOptions           │
//! │  node/       - Node and its typed key             │
//! │  nodemap/    - Node storage per holder            │
//! │  graph/      - Inheritance traversal              │
//! │  calculator/ - Tristate permission lookups        │
//! │  metastack/  - Meta accumulation and stacking     │
//! │  cache/      - CachedData containers              │
//! │  holder/     - PermissionHolder, HolderRegistry   │
//! └───────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod calculator;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod holder;
pub mod metastack;
pub mod node;
pub mod nodemap;

// Re-export commonly used types at the crate root
pub use cache::{register_cached_data_metrics, CachedData};
pub use calculator::{PermissionData, Tristate};
pub use config::{CachedDataConfig, ResolutionConfig};
pub use context::{ContextSet, MetaContexts, QueryOptions};
pub use error::{DomainError, DomainResult};
pub use holder::{HolderId, HolderRegistry, PermissionHolder};
pub use metastack::MetaData;
pub use node::Node;
