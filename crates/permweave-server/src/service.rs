//! The storage-backed permission service.
//!
//! Bridges [`NodeStorage`] records and the in-memory [`HolderRegistry`]:
//! holders are loaded into the registry, queried through their caches,
//! mutated in memory and written back on [`PermissionService::save_holder`].

use std::sync::Arc;
use std::time::Instant;

use futures::future::{join, join_all};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use permweave_domain::calculator::{NoPlatformDefaults, PlatformDefaultsProvider};
use permweave_domain::context::{ContextSet, QueryOptions};
use permweave_domain::nodemap::Difference;
use permweave_domain::{HolderId, HolderRegistry, MetaData, Node, PermissionHolder, Tristate};
use permweave_storage::{GroupRecord, NodeModel, NodeStorage, TrackRecord, UserRecord};

use crate::config::ServerConfig;
use crate::convert::{node_to_model, nodes_from_models};
use crate::error::{ServiceError, ServiceResult};
use crate::housekeeping::Housekeeping;
use crate::observability::{record_holder_load, record_storage_operation};
use crate::singleflight::{Singleflight, SingleflightGuard, Slot};

/// How cached data is refreshed after a mutation.
///
/// The mutation itself always drops the affected cache entries. The
/// refresh decides how the entries that were cached before are rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Refresh {
    /// Recompute in the background and return at once.
    #[default]
    Recalculate,
    /// Recompute and wait until every entry is installed again.
    Reload,
}

/// Permission checks, meta lookups and node mutations for loaded holders.
pub struct PermissionService<S>
where
    S: NodeStorage,
{
    storage: Arc<S>,
    registry: Arc<HolderRegistry>,
    login_query: QueryOptions,
    housekeeping_interval: std::time::Duration,
    user_loads: Singleflight<Uuid, Arc<PermissionHolder>>,
}

impl<S> PermissionService<S>
where
    S: NodeStorage,
{
    /// Creates a service with no platform default permissions.
    pub fn new(config: &ServerConfig, storage: Arc<S>) -> ServiceResult<Self> {
        Self::with_platform_defaults(config, storage, Arc::new(NoPlatformDefaults))
    }

    pub fn with_platform_defaults(
        config: &ServerConfig,
        storage: Arc<S>,
        defaults: Arc<dyn PlatformDefaultsProvider>,
    ) -> ServiceResult<Self> {
        let resolution = config.resolution_config()?;
        let login_query = resolution.apply_to(QueryOptions::contextual(config.login_contexts()?));
        let registry = HolderRegistry::new(resolution, config.cache_config(), defaults);
        Ok(Self {
            storage,
            registry,
            login_query,
            housekeeping_interval: config.housekeeping_interval(),
            user_loads: Singleflight::new(),
        })
    }

    pub fn registry(&self) -> &Arc<HolderRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Query options a user is pre-calculated for on load.
    pub fn login_query(&self) -> &QueryOptions {
        &self.login_query
    }

    /// Query options for `contexts` under the configured satisfy mode.
    pub fn query_for(&self, contexts: &ContextSet) -> QueryOptions {
        self.registry
            .resolution()
            .apply_to(QueryOptions::contextual(contexts.clone()))
    }

    /// Periodic cache cleanup and expiry audit for this service's holders.
    pub fn housekeeping(&self) -> Housekeeping {
        Housekeeping::new(Arc::clone(&self.registry), self.housekeeping_interval)
    }

    fn holder(&self, id: &HolderId) -> ServiceResult<Arc<PermissionHolder>> {
        self.registry
            .holder(id)
            .ok_or_else(|| ServiceError::HolderNotLoaded {
                holder: id.to_string(),
            })
    }

    // ============================================================
    // Loading
    // ============================================================

    /// Loads every stored group and track, replacing what is in memory.
    /// Groups no longer in storage are dropped. Returns the group count.
    #[instrument(skip(self))]
    pub async fn load_all_groups(&self) -> ServiceResult<usize> {
        let names = self.storage.list_groups().await?;
        for name in &names {
            self.load_group(name).await?;
        }

        for stale in self
            .registry
            .group_names()
            .into_iter()
            .filter(|loaded| !names.contains(loaded))
        {
            self.registry.delete_group(&stale);
        }

        for track in self.storage.load_tracks().await? {
            self.registry.set_track(&track.name, &track.groups);
        }

        info!(groups = names.len(), "groups loaded");
        Ok(names.len())
    }

    /// Loads one group from storage. `None` if it is not stored.
    pub async fn load_group(&self, name: &str) -> ServiceResult<Option<Arc<PermissionHolder>>> {
        let start = Instant::now();
        let result = self.fetch_group(name).await;
        record_holder_load("group", result.is_ok(), start.elapsed().as_secs_f64());
        result
    }

    async fn fetch_group(&self, name: &str) -> ServiceResult<Option<Arc<PermissionHolder>>> {
        let Some(record) = self.storage.load_group(name).await? else {
            return Ok(None);
        };
        let id = HolderId::group(&record.name);
        let nodes = nodes_from_models(&id, &record.nodes)?;

        let group = self.registry.get_or_create_group(&record.name);
        group.load_nodes(nodes);
        debug!(group = %id, nodes = record.nodes.len(), "group loaded from storage");
        Ok(Some(group))
    }

    /// Loads a user from storage and warms its cache for the login
    /// contexts. Concurrent loads of the same user share one storage read.
    ///
    /// A user with no stored group membership is given the default group.
    pub async fn load_user(&self, uuid: Uuid) -> ServiceResult<Arc<PermissionHolder>> {
        match self.user_loads.acquire(uuid) {
            Slot::Leader(tx) => {
                let guard = SingleflightGuard::new(&self.user_loads, uuid);
                let start = Instant::now();
                let result = self.fetch_user(uuid).await;
                record_holder_load("user", result.is_ok(), start.elapsed().as_secs_f64());

                let shared = match &result {
                    Ok(user) => Ok(Arc::clone(user)),
                    Err(e) => Err(e.to_string()),
                };
                guard.complete(&tx, shared);
                result
            }
            Slot::Follower(mut rx) => match rx.recv().await {
                Ok(Ok(user)) => Ok(user),
                Ok(Err(message)) => Err(ServiceError::LoadFailed { message }),
                // The leader went away without an outcome.
                Err(_) => self.fetch_user(uuid).await,
            },
        }
    }

    #[instrument(skip(self))]
    async fn fetch_user(&self, uuid: Uuid) -> ServiceResult<Arc<PermissionHolder>> {
        let id = HolderId::user(uuid);
        let record = self.storage.load_user(uuid).await?;
        let (nodes, primary_group) = match &record {
            Some(record) => (
                nodes_from_models(&id, &record.nodes)?,
                record.primary_group.clone(),
            ),
            None => (Vec::new(), None),
        };

        let user = self.registry.get_or_create_user(uuid);
        user.load_nodes(nodes);
        user.set_primary_group(primary_group.as_deref());

        if !user.nodes().iter().any(|n| n.group_name().is_some()) {
            let default_group = &self.registry.resolution().default_primary_group;
            user.set_node(Node::inheritance(default_group).build()?);
        }

        user.cached_data().pre_calculate(&self.login_query)?;
        debug!(user = %id, known = record.is_some(), "user loaded from storage");
        Ok(user)
    }

    /// Drops a user from memory. Unsaved changes are lost.
    pub fn unload_user(&self, uuid: &Uuid) -> bool {
        self.registry.unload_user(uuid).is_some()
    }

    // ============================================================
    // Persistence
    // ============================================================

    /// Writes the holder's normal nodes back to storage and returns the
    /// changes made since the previous save.
    #[instrument(skip(self), fields(holder = %id))]
    pub async fn save_holder(&self, id: &HolderId) -> ServiceResult<Difference> {
        let holder = self.holder(id)?;
        let nodes: Vec<NodeModel> = holder.nodes().iter().map(node_to_model).collect();

        let (operation, result) = match id {
            HolderId::User(uuid) => {
                let record = UserRecord {
                    uuid: *uuid,
                    primary_group: holder.primary_group(),
                    nodes,
                };
                ("save_user", self.storage.save_user(&record).await)
            }
            HolderId::Group(name) => {
                let record = GroupRecord {
                    name: name.clone(),
                    nodes,
                };
                ("save_group", self.storage.save_group(&record).await)
            }
        };
        record_storage_operation(operation, result.is_ok());
        result?;

        let changes = holder
            .normal_data()
            .export_changes(|_| true)
            .unwrap_or_else(Difference::new);
        debug!(
            added = changes.added().len(),
            removed = changes.removed().len(),
            "holder saved"
        );
        Ok(changes)
    }

    /// Creates an empty group in memory and storage, if it does not exist.
    pub async fn create_group(&self, name: &str) -> ServiceResult<Arc<PermissionHolder>> {
        if let Some(group) = self.registry.group(name) {
            return Ok(group);
        }
        let result = self.storage.save_group(&GroupRecord::new(name)).await;
        record_storage_operation("save_group", result.is_ok());
        result?;
        Ok(self.registry.get_or_create_group(name))
    }

    pub async fn delete_group(&self, name: &str) -> ServiceResult<()> {
        let result = self.storage.delete_group(name).await;
        record_storage_operation("delete_group", result.is_ok());
        result?;
        self.registry.delete_group(name);
        Ok(())
    }

    pub async fn save_track(&self, name: &str, groups: Vec<String>) -> ServiceResult<()> {
        let record = TrackRecord {
            name: name.to_string(),
            groups,
        };
        let result = self.storage.save_track(&record).await;
        record_storage_operation("save_track", result.is_ok());
        result?;
        self.registry.set_track(name, &record.groups);
        Ok(())
    }

    // ============================================================
    // Queries
    // ============================================================

    /// Resolved value of `permission` for a loaded holder in `contexts`.
    ///
    /// Malformed permission strings are rejected.
    pub fn check_permission(
        &self,
        id: &HolderId,
        permission: &str,
        contexts: &ContextSet,
    ) -> ServiceResult<Tristate> {
        let holder = self.holder(id)?;
        let data = holder.get_permission_data(&self.query_for(contexts));
        Ok(data.check_permission(permission)?.result)
    }

    /// Resolved meta of a loaded holder in `contexts`.
    pub fn lookup_meta(&self, id: &HolderId, contexts: &ContextSet) -> ServiceResult<Arc<MetaData>> {
        let holder = self.holder(id)?;
        Ok(holder.get_meta_data(&self.query_for(contexts)))
    }

    // ============================================================
    // Mutation
    // ============================================================

    /// Adds or replaces a node on a loaded holder.
    pub async fn set_node(
        &self,
        id: &HolderId,
        node: Node,
        refresh: Refresh,
    ) -> ServiceResult<Difference> {
        self.mutate(id, refresh, |holder| holder.set_node(node)).await
    }

    /// Removes the node matching `node` (ignoring value and expiry).
    pub async fn unset_node(
        &self,
        id: &HolderId,
        node: &Node,
        refresh: Refresh,
    ) -> ServiceResult<Difference> {
        self.mutate(id, refresh, |holder| holder.unset_node(node)).await
    }

    /// Sets a user's primary group. Only meta depends on it.
    pub fn set_primary_group(&self, uuid: Uuid, group: Option<&str>) -> ServiceResult<()> {
        let user = self.holder(&HolderId::user(uuid))?;
        user.set_primary_group(group);
        Ok(())
    }

    async fn mutate<F>(
        &self,
        id: &HolderId,
        refresh: Refresh,
        mutation: F,
    ) -> ServiceResult<Difference>
    where
        F: FnOnce(&PermissionHolder) -> Difference,
    {
        let holder = self.holder(id)?;

        // A group change can affect every loaded holder.
        let affected = if id.is_group() {
            let mut all = self.registry.users();
            all.extend(self.registry.groups());
            all
        } else {
            vec![Arc::clone(&holder)]
        };
        let snapshot: Vec<_> = affected
            .into_iter()
            .map(|h| {
                let permissions = h.cached_data().cached_permission_keys();
                let meta = h.cached_data().cached_meta_keys();
                (h, permissions, meta)
            })
            .collect();

        let difference = mutation(holder.as_ref());
        if difference.is_empty() {
            return Ok(difference);
        }
        debug!(
            holder = %id,
            ?refresh,
            added = difference.added().len(),
            removed = difference.removed().len(),
            "holder mutated"
        );

        match refresh {
            Refresh::Recalculate => {
                for (h, permissions, meta) in snapshot {
                    for query in permissions {
                        drop(h.cached_data().recalculate_permissions(query));
                    }
                    for contexts in meta {
                        drop(h.cached_data().recalculate_meta(contexts));
                    }
                }
            }
            Refresh::Reload => {
                let mut permission_reloads = Vec::new();
                let mut meta_reloads = Vec::new();
                for (h, permissions, meta) in snapshot {
                    for query in permissions {
                        permission_reloads.push(h.cached_data().reload_permissions(query));
                    }
                    for contexts in meta {
                        meta_reloads.push(h.cached_data().reload_meta(contexts));
                    }
                }
                let (permissions, meta) =
                    join(join_all(permission_reloads), join_all(meta_reloads)).await;
                let failures = permissions.iter().filter(|r| r.is_err()).count()
                    + meta.iter().filter(|r| r.is_err()).count();
                if failures > 0 {
                    warn!(holder = %id, failures, "reload after mutation failed");
                }
            }
        }
        Ok(difference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use permweave_storage::MemoryNodeStorage;

    fn service() -> PermissionService<MemoryNodeStorage> {
        PermissionService::new(&ServerConfig::default(), MemoryNodeStorage::new_shared()).unwrap()
    }

    fn node(key: &str) -> Node {
        Node::builder(key).build().unwrap()
    }

    // ============================================================
    // Section 1: Loading
    // ============================================================

    #[tokio::test]
    async fn test_new_user_gets_default_group() {
        // Arrange
        let service = service();
        let uuid = Uuid::new_v4();

        // Act
        let user = service.load_user(uuid).await.unwrap();

        // Assert
        assert!(user.nodes().iter().any(|n| n.group_name() == Some("default")));
        assert!(!user.cached_data().cached_permission_keys().is_empty());
    }

    #[tokio::test]
    async fn test_load_user_reads_stored_nodes() {
        let service = service();
        let uuid = Uuid::new_v4();
        let mut record = UserRecord::new(uuid);
        record.nodes.push(NodeModel::new("group.vip", true));
        record.nodes.push(NodeModel::new("essentials.fly", true).with_server("lobby"));
        record.primary_group = Some("vip".to_string());
        service.storage().save_user(&record).await.unwrap();

        let user = service.load_user(uuid).await.unwrap();

        assert_eq!(user.nodes().len(), 2);
        assert_eq!(user.primary_group().as_deref(), Some("vip"));
        assert!(!user.normal_data().has_changes());
    }

    #[tokio::test]
    async fn test_unknown_holder_is_not_loaded() {
        let service = service();

        let err = service
            .check_permission(&HolderId::group("ghost"), "fly", &ContextSet::empty())
            .unwrap_err();

        assert!(matches!(err, ServiceError::HolderNotLoaded { .. }));
    }

    // ============================================================
    // Section 2: Queries and mutation
    // ============================================================

    #[tokio::test]
    async fn test_check_permission_rejects_malformed_permission() {
        let service = service();
        let uuid = Uuid::new_v4();
        service.load_user(uuid).await.unwrap();

        let err = service
            .check_permission(&HolderId::user(uuid), "  ", &ContextSet::empty())
            .unwrap_err();

        assert!(matches!(err, ServiceError::Domain(_)));
    }

    #[tokio::test]
    async fn test_set_node_with_reload_is_visible_immediately() {
        let service = service();
        let uuid = Uuid::new_v4();
        let id = HolderId::user(uuid);
        service.load_user(uuid).await.unwrap();
        let global = ContextSet::empty();
        assert_eq!(
            service.check_permission(&id, "essentials.fly", &global).unwrap(),
            Tristate::Undefined
        );

        let difference = service
            .set_node(&id, node("essentials.fly"), Refresh::Reload)
            .await
            .unwrap();

        assert_eq!(difference.added().len(), 1);
        assert_eq!(
            service.check_permission(&id, "essentials.fly", &global).unwrap(),
            Tristate::True
        );
    }

    #[tokio::test]
    async fn test_group_mutation_reaches_members() {
        let service = service();
        let uuid = Uuid::new_v4();
        let user_id = HolderId::user(uuid);
        service.create_group("default").await.unwrap();
        service.load_user(uuid).await.unwrap();
        let global = ContextSet::empty();
        service.check_permission(&user_id, "chat.color", &global).unwrap();

        service
            .set_node(&HolderId::group("default"), node("chat.color"), Refresh::Reload)
            .await
            .unwrap();

        assert_eq!(
            service.check_permission(&user_id, "chat.color", &global).unwrap(),
            Tristate::True
        );
    }

    #[tokio::test]
    async fn test_unset_missing_node_is_a_no_op() {
        let service = service();
        let uuid = Uuid::new_v4();
        service.load_user(uuid).await.unwrap();

        let difference = service
            .unset_node(&HolderId::user(uuid), &node("not.there"), Refresh::Recalculate)
            .await
            .unwrap();

        assert!(difference.is_empty());
    }

    // ============================================================
    // Section 3: Persistence
    // ============================================================

    #[tokio::test]
    async fn test_save_holder_exports_changes_once() {
        let service = service();
        let uuid = Uuid::new_v4();
        let id = HolderId::user(uuid);
        service.load_user(uuid).await.unwrap();
        service
            .set_node(&id, node("essentials.home"), Refresh::Recalculate)
            .await
            .unwrap();

        let first = service.save_holder(&id).await.unwrap();
        let second = service.save_holder(&id).await.unwrap();

        // The default group node and the new permission.
        assert_eq!(first.added().len(), 2);
        assert!(second.is_empty());
        let stored = service.storage().load_user(uuid).await.unwrap().unwrap();
        assert_eq!(stored.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_group_removes_it_everywhere() {
        let service = service();
        service.create_group("temp").await.unwrap();

        service.delete_group("temp").await.unwrap();

        assert!(!service.registry().is_group_loaded("temp"));
        assert!(service.storage().load_group("temp").await.unwrap().is_none());
    }
}
