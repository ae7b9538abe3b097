//! NodeStorage trait definition.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::model::{GroupRecord, TrackRecord, UserRecord};

/// Abstract persistence for holders and tracks.
///
/// Implementations must be thread-safe (Send + Sync) and support
/// async operations.
#[async_trait]
pub trait NodeStorage: Send + Sync + 'static {
    // User operations

    /// Loads a user, or `None` if the user has never been saved.
    async fn load_user(&self, uuid: Uuid) -> StorageResult<Option<UserRecord>>;

    /// Saves (inserts or replaces) a user.
    async fn save_user(&self, record: &UserRecord) -> StorageResult<()>;

    // Group operations

    /// Loads a group, or `None` if it does not exist.
    async fn load_group(&self, name: &str) -> StorageResult<Option<GroupRecord>>;

    /// Saves (inserts or replaces) a group.
    async fn save_group(&self, record: &GroupRecord) -> StorageResult<()>;

    /// Deletes a group. Fails with `HolderNotFound` if it does not exist.
    async fn delete_group(&self, name: &str) -> StorageResult<()>;

    /// Names of every stored group, sorted.
    async fn list_groups(&self) -> StorageResult<Vec<String>>;

    // Track operations

    /// Loads every track.
    async fn load_tracks(&self) -> StorageResult<Vec<TrackRecord>>;

    /// Saves (inserts or replaces) a track.
    async fn save_track(&self, record: &TrackRecord) -> StorageResult<()>;
}

/// Validates a group or track name.
///
/// Names are stored lower-cased and may not be empty or contain whitespace.
pub fn validate_name(kind: &str, name: &str) -> StorageResult<()> {
    if name.is_empty() {
        return Err(StorageError::InvalidInput {
            message: format!("{kind} name cannot be empty"),
        });
    }
    if name.chars().any(char::is_whitespace) {
        return Err(StorageError::InvalidInput {
            message: format!("{kind} name cannot contain whitespace: {name:?}"),
        });
    }
    Ok(())
}
