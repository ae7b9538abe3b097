//! In-memory storage implementation.
//!
//! Records are kept whole per holder in DashMaps, so a save replaces the
//! holder's previous record atomically.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::model::{GroupRecord, TrackRecord, UserRecord};
use crate::traits::{validate_name, NodeStorage};

/// In-memory implementation of NodeStorage.
#[derive(Debug, Default)]
pub struct MemoryNodeStorage {
    users: DashMap<Uuid, UserRecord>,
    groups: DashMap<String, GroupRecord>,
    tracks: DashMap<String, TrackRecord>,
}

impl MemoryNodeStorage {
    /// Creates a new in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory storage wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

fn normalise(name: &str) -> String {
    name.trim().to_lowercase()
}

#[async_trait]
impl NodeStorage for MemoryNodeStorage {
    async fn load_user(&self, uuid: Uuid) -> StorageResult<Option<UserRecord>> {
        Ok(self.users.get(&uuid).map(|u| u.value().clone()))
    }

    #[instrument(skip(self, record), fields(uuid = %record.uuid))]
    async fn save_user(&self, record: &UserRecord) -> StorageResult<()> {
        for node in &record.nodes {
            node.validate()?;
        }
        self.users.insert(record.uuid, record.clone());
        Ok(())
    }

    async fn load_group(&self, name: &str) -> StorageResult<Option<GroupRecord>> {
        Ok(self.groups.get(&normalise(name)).map(|g| g.value().clone()))
    }

    #[instrument(skip(self, record), fields(group = %record.name))]
    async fn save_group(&self, record: &GroupRecord) -> StorageResult<()> {
        let name = normalise(&record.name);
        validate_name("group", &name)?;
        for node in &record.nodes {
            node.validate()?;
        }
        let mut record = record.clone();
        record.name = name.clone();
        self.groups.insert(name, record);
        Ok(())
    }

    async fn delete_group(&self, name: &str) -> StorageResult<()> {
        let name = normalise(name);
        self.groups
            .remove(&name)
            .map(|_| ())
            .ok_or(StorageError::HolderNotFound {
                holder: format!("group:{name}"),
            })
    }

    async fn list_groups(&self) -> StorageResult<Vec<String>> {
        let mut names: Vec<String> = self.groups.iter().map(|g| g.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn load_tracks(&self) -> StorageResult<Vec<TrackRecord>> {
        let mut tracks: Vec<TrackRecord> = self.tracks.iter().map(|t| t.value().clone()).collect();
        tracks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tracks)
    }

    async fn save_track(&self, record: &TrackRecord) -> StorageResult<()> {
        let name = normalise(&record.name);
        validate_name("track", &name)?;
        let record = TrackRecord {
            name: name.clone(),
            groups: record.groups.iter().map(|g| normalise(g)).collect(),
        };
        self.tracks.insert(name, record);
        Ok(())
    }
}
