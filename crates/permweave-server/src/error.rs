//! Service error types.

use thiserror::Error;

use permweave_domain::DomainError;
use permweave_storage::StorageError;

use crate::config::ConfigLoadError;

/// Errors surfaced by [`crate::PermissionService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigLoadError),

    /// The holder is not in memory; load it first.
    #[error("holder not loaded: {holder}")]
    HolderNotLoaded { holder: String },

    /// A stored record could not be turned into domain nodes.
    #[error("invalid stored record for {holder}: {message}")]
    InvalidRecord { holder: String, message: String },

    /// A concurrent load of the same holder failed.
    #[error("holder load failed: {message}")]
    LoadFailed { message: String },
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
