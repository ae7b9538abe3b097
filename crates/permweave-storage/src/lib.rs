//! permweave-storage: Storage boundary
//!
//! This crate defines how holder data crosses into and out of persistence:
//! - `NodeModel` records and per-holder record types
//! - NodeStorage trait for loading and saving holders and tracks
//! - In-memory implementation for tests and single-process deployments
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              permweave-storage              │
//! ├─────────────────────────────────────────────┤
//! │  model.rs  - NodeModel, holder records      │
//! │  traits.rs - NodeStorage trait definition   │
//! │  memory.rs - In-memory implementation       │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod model;
pub mod traits;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::MemoryNodeStorage;
pub use model::{GroupRecord, NodeModel, TrackRecord, UserRecord};
pub use traits::NodeStorage;
