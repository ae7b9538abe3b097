//! permweave-server: configuration, observability and the storage-backed
//! permission service.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   permweave-server                   │
//! ├──────────────────────────────────────────────────────┤
//! │  config.rs        - ServerConfig (YAML + env)        │
//! │  observability/   - logging and Prometheus metrics   │
//! │  service.rs       - PermissionService                │
//! │  convert.rs       - NodeModel <-> Node               │
//! │  singleflight.rs  - deduplicated user loads          │
//! │  housekeeping.rs  - cache cleanup and expiry audit   │
//! └──────────────────────────────────────────────────────┘
//!            │                              │
//!            ▼                              ▼
//!    permweave-domain               permweave-storage
//!   (HolderRegistry, caches)        (NodeStorage trait)
//! ```

pub mod config;
pub mod convert;
pub mod error;
pub mod housekeeping;
pub mod observability;
pub mod service;
mod singleflight;

pub use config::{ConfigLoadError, ServerConfig};
pub use error::{ServiceError, ServiceResult};
pub use housekeeping::{Housekeeping, HousekeepingReport};
pub use service::{PermissionService, Refresh};
