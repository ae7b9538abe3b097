//! Keyed registry of loaded holders.

use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::id::HolderId;
use super::permission_holder::PermissionHolder;
use super::track::TrackRegistry;
use crate::cache::CacheDataSource;
use crate::calculator::{CalculatorFactory, PermissionData, PlatformDefaultsProvider};
use crate::config::{CachedDataConfig, ResolutionConfig};
use crate::context::{MetaContexts, QueryOptions};
use crate::error::{DomainError, DomainResult};
use crate::metastack::{MetaAccumulator, MetaData};

/// Owns every loaded user and group.
///
/// Inheritance nodes name groups; the registry resolves those names at
/// traversal time, so a group referenced before it is loaded is simply
/// skipped.
pub struct HolderRegistry {
    users: DashMap<Uuid, Arc<PermissionHolder>>,
    groups: DashMap<String, Arc<PermissionHolder>>,
    tracks: Arc<TrackRegistry>,
    factory: CalculatorFactory,
    resolution: ResolutionConfig,
    cache_config: CachedDataConfig,
}

impl fmt::Debug for HolderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HolderRegistry")
            .field("users", &self.users.len())
            .field("groups", &self.groups.len())
            .field("tracks", &self.tracks.len())
            .field("factory", &self.factory)
            .finish()
    }
}

impl HolderRegistry {
    pub fn new(
        resolution: ResolutionConfig,
        cache_config: CachedDataConfig,
        defaults: Arc<dyn PlatformDefaultsProvider>,
    ) -> Arc<Self> {
        let factory = CalculatorFactory::new(&resolution, &cache_config, defaults);
        Arc::new(Self {
            users: DashMap::new(),
            groups: DashMap::new(),
            tracks: Arc::new(TrackRegistry::new()),
            factory,
            resolution,
            cache_config,
        })
    }

    pub fn resolution(&self) -> &ResolutionConfig {
        &self.resolution
    }

    pub fn cache_config(&self) -> &CachedDataConfig {
        &self.cache_config
    }

    pub fn factory(&self) -> &CalculatorFactory {
        &self.factory
    }

    pub fn tracks(&self) -> &Arc<TrackRegistry> {
        &self.tracks
    }

    fn create(self: &Arc<Self>, id: HolderId) -> Arc<PermissionHolder> {
        let link = Arc::new(HolderLink {
            registry: Arc::downgrade(self),
            id: id.clone(),
        });
        Arc::new(PermissionHolder::new(
            id,
            Arc::downgrade(self),
            link,
            self.cache_config.clone(),
        ))
    }

    // ------------------------------------------------------------
    // Users and groups
    // ------------------------------------------------------------

    /// Returns the loaded user, creating an empty one if needed.
    pub fn get_or_create_user(self: &Arc<Self>, uuid: Uuid) -> Arc<PermissionHolder> {
        if let Some(user) = self.users.get(&uuid) {
            return Arc::clone(user.value());
        }
        match self.users.entry(uuid) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let user = self.create(HolderId::user(uuid));
                entry.insert(Arc::clone(&user));
                debug!(%uuid, "user loaded");
                user
            }
        }
    }

    /// Returns the loaded group, creating an empty one if needed.
    ///
    /// A new group can change the inheritance of any loaded holder, so
    /// their cached data is dropped.
    pub fn get_or_create_group(self: &Arc<Self>, name: &str) -> Arc<PermissionHolder> {
        let name = name.trim().to_lowercase();
        if let Some(group) = self.groups.get(&name) {
            return Arc::clone(group.value());
        }
        let created = match self.groups.entry(name.clone()) {
            Entry::Occupied(entry) => return Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let group = self.create(HolderId::Group(name.clone()));
                entry.insert(Arc::clone(&group));
                group
            }
        };
        debug!(group = %name, "group loaded");
        self.invalidate_all_holders();
        created
    }

    pub fn user(&self, uuid: &Uuid) -> Option<Arc<PermissionHolder>> {
        self.users.get(uuid).map(|u| Arc::clone(u.value()))
    }

    pub fn group(&self, name: &str) -> Option<Arc<PermissionHolder>> {
        self.groups
            .get(&name.trim().to_lowercase())
            .map(|g| Arc::clone(g.value()))
    }

    pub fn holder(&self, id: &HolderId) -> Option<Arc<PermissionHolder>> {
        match id {
            HolderId::User(uuid) => self.user(uuid),
            HolderId::Group(name) => self.groups.get(name).map(|g| Arc::clone(g.value())),
        }
    }

    pub fn is_group_loaded(&self, name: &str) -> bool {
        self.groups.contains_key(&name.trim().to_lowercase())
    }

    /// Unloads a user, dropping its transient nodes and cached data.
    pub fn unload_user(&self, uuid: &Uuid) -> Option<Arc<PermissionHolder>> {
        let (_, user) = self.users.remove(uuid)?;
        user.clear_transient_nodes();
        user.cached_data().invalidate();
        debug!(%uuid, "user unloaded");
        Some(user)
    }

    /// Removes a group. Holders inheriting it stop doing so on their next
    /// computation.
    pub fn delete_group(&self, name: &str) -> Option<Arc<PermissionHolder>> {
        let (_, group) = self.groups.remove(&name.trim().to_lowercase())?;
        debug!(group = %group.id(), "group deleted");
        self.invalidate_all_holders();
        Some(group)
    }

    pub fn users(&self) -> Vec<Arc<PermissionHolder>> {
        self.users.iter().map(|u| Arc::clone(u.value())).collect()
    }

    pub fn groups(&self) -> Vec<Arc<PermissionHolder>> {
        self.groups.iter().map(|g| Arc::clone(g.value())).collect()
    }

    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.iter().map(|g| g.key().clone()).collect();
        names.sort();
        names
    }

    /// Defines or replaces a track. Stack elements filter on track
    /// membership, so cached meta of every holder is dropped.
    pub fn set_track<I, S>(&self, name: &str, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tracks.insert(name, groups);
        self.invalidate_all_holders();
    }

    pub fn remove_track(&self, name: &str) -> Option<Vec<String>> {
        let removed = self.tracks.remove(name);
        if removed.is_some() {
            self.invalidate_all_holders();
        }
        removed
    }

    // ------------------------------------------------------------
    // Cache maintenance
    // ------------------------------------------------------------

    fn all_holders(&self) -> Vec<Arc<PermissionHolder>> {
        let mut holders = self.users();
        holders.extend(self.groups());
        holders
    }

    #[instrument(skip(self))]
    pub fn invalidate_all_holders(&self) {
        for holder in self.all_holders() {
            holder.cached_data().invalidate();
        }
    }

    /// Clears calculator memos everywhere, e.g. after the platform's
    /// default permissions changed.
    pub fn invalidate_permission_calculators(&self) {
        for holder in self.all_holders() {
            holder.cached_data().invalidate_permission_calculators();
        }
    }

    /// Runs cached data cleanup on every holder. Returns entries removed.
    pub fn perform_cleanup(&self) -> usize {
        self.all_holders()
            .iter()
            .map(|holder| holder.cached_data().perform_cleanup())
            .sum()
    }

    /// Removes expired nodes from every holder.
    pub fn audit_temporary_nodes(&self) -> usize {
        self.all_holders()
            .iter()
            .map(|holder| holder.audit_temporary_nodes().removed().len())
            .sum()
    }

    pub(crate) fn meta_contexts_for(&self, query: &QueryOptions) -> MetaContexts {
        MetaContexts::new(
            query.clone(),
            self.resolution.prefix_stack.clone(),
            self.resolution.suffix_stack.clone(),
        )
    }

    pub(crate) fn calculate_permissions(
        &self,
        holder: &PermissionHolder,
        query: &QueryOptions,
    ) -> PermissionData {
        let map = self.export_permissions(holder, query);
        let calculator = self.factory.build(map, query);
        PermissionData::new(query.clone(), calculator)
    }

    pub(crate) fn calculate_meta(
        &self,
        holder: &PermissionHolder,
        contexts: &MetaContexts,
    ) -> DomainResult<MetaData> {
        let mut accumulator = MetaAccumulator::new(
            contexts.prefix_stack.clone(),
            contexts.suffix_stack.clone(),
            Arc::clone(&self.tracks),
        );
        self.accumulate_meta(holder, &mut accumulator, &contexts.query)?;
        accumulator.complete();
        MetaData::from_accumulator(
            contexts.clone(),
            &accumulator,
            self.resolution.meta_value_selector,
        )
    }
}

/// Computes a holder's cached data through the registry.
///
/// Holds the registry weakly so holders never keep it alive; a holder
/// that has been unloaded computes to [`DomainError::HolderNotLoaded`].
#[derive(Debug)]
struct HolderLink {
    registry: Weak<HolderRegistry>,
    id: HolderId,
}

impl HolderLink {
    fn resolve(&self) -> DomainResult<(Arc<HolderRegistry>, Arc<PermissionHolder>)> {
        let not_loaded = || DomainError::HolderNotLoaded {
            holder: self.id.to_string(),
        };
        let registry = self.registry.upgrade().ok_or_else(not_loaded)?;
        let holder = registry.holder(&self.id).ok_or_else(not_loaded)?;
        Ok((registry, holder))
    }
}

impl CacheDataSource for HolderLink {
    fn calculate_permissions(&self, query: &QueryOptions) -> DomainResult<PermissionData> {
        let (registry, holder) = self.resolve()?;
        Ok(registry.calculate_permissions(&holder, query))
    }

    fn calculate_meta(&self, contexts: &MetaContexts) -> DomainResult<MetaData> {
        let (registry, holder) = self.resolve()?;
        registry.calculate_meta(&holder, contexts)
    }

    fn meta_contexts_for(&self, query: &QueryOptions) -> MetaContexts {
        match self.registry.upgrade() {
            Some(registry) => registry.meta_contexts_for(query),
            None => MetaContexts::new(query.clone(), Default::default(), Default::default()),
        }
    }
}
