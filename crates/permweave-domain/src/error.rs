//! Domain error types for permission resolution.

use thiserror::Error;

/// Domain-specific errors for permission and meta resolution.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A caller supplied an argument the core cannot work with.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Permission string is empty or contains reserved characters.
    #[error("invalid permission: {value:?}")]
    InvalidPermission { value: String },

    /// Context key or value is malformed.
    #[error("invalid context: {message}")]
    InvalidContext { message: String },

    /// Node could not be built.
    #[error("invalid node: {message}")]
    InvalidNode { message: String },

    /// Meta stack element string could not be parsed.
    #[error("invalid meta stack element: {value}")]
    InvalidStackDefinition { value: String },

    /// Operation is not valid for the current lifecycle state.
    #[error("illegal state: {message}")]
    IllegalState { message: String },

    /// The holder backing a cache has been unloaded.
    #[error("holder not loaded: {holder}")]
    HolderNotLoaded { holder: String },

    /// Background recomputation failed.
    #[error("computation failed: {message}")]
    ComputationFailed { message: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
