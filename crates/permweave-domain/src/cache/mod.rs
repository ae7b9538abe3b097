//! Per-holder cached permission and meta data.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────── CachedData ───────────────────────┐
//!  get(query) ───►│ permission container   QueryOptions  → Arc<PermissionData> │
//!  get(meta)  ───►│ meta container         MetaContexts  → Arc<MetaData>       │
//!                 │        │ miss / reload / recalculate                       │
//!                 │        ▼                                                   │
//!                 │   CacheDataSource (the holder)  ◄── ticket taken first     │
//!                 └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Refresh semantics
//!
//! - **get**: a miss computes synchronously on the caller's thread. A failed
//!   computation is logged and answered with empty data, which is not cached.
//! - **recalculate**: the old value keeps being served until the background
//!   result is installed.
//! - **reload**: the entry is removed at once. Reads in the meantime compute
//!   synchronously, so the old value is never served again.
//! - **invalidate**: the entry is removed; the next read computes.
//! - **expiry**: an entry not read for `expire_after_access` is treated as
//!   absent; [`CachedData::perform_cleanup`] reclaims its memory.
//!
//! A result computed before an invalidation is never installed after it
//! (see [`container`]).
//!
//! Background work runs on Tokio's blocking pool, so `recalculate*` and
//! `reload*` must be called from within a Tokio runtime.

mod container;
mod source;

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::calculator::PermissionData;
use crate::config::CachedDataConfig;
use crate::context::{MetaContexts, QueryOptions};
use crate::error::{DomainError, DomainResult};
use crate::metastack::MetaData;

use container::Container;
pub use container::CacheKind;
pub use source::CacheDataSource;

/// Permission container binding.
#[derive(Debug)]
pub struct PermissionKind;

impl CacheKind for PermissionKind {
    type Key = QueryOptions;
    type Value = PermissionData;

    const NAME: &'static str = "permission";

    fn calculate(source: &dyn CacheDataSource, key: &QueryOptions) -> DomainResult<PermissionData> {
        source.calculate_permissions(key)
    }

    fn empty(key: &QueryOptions) -> PermissionData {
        PermissionData::empty(key.clone())
    }
}

/// Meta container binding.
#[derive(Debug)]
pub struct MetaKind;

impl CacheKind for MetaKind {
    type Key = MetaContexts;
    type Value = MetaData;

    const NAME: &'static str = "meta";

    fn calculate(source: &dyn CacheDataSource, key: &MetaContexts) -> DomainResult<MetaData> {
        source.calculate_meta(key)
    }

    fn empty(key: &MetaContexts) -> MetaData {
        MetaData::empty(key.clone())
    }
}

/// One container plus the source it computes from.
struct Cache<C: CacheKind> {
    container: Arc<Container<C>>,
    source: Arc<dyn CacheDataSource>,
}

impl<C: CacheKind> Cache<C> {
    fn new(source: Arc<dyn CacheDataSource>, config: &CachedDataConfig) -> Self {
        Self {
            container: Arc::new(Container::new(
                config.expire_after_access,
                config.max_cached_entries,
            )),
            source,
        }
    }

    fn get(&self, key: &C::Key) -> Arc<C::Value> {
        if let Some(value) = self.container.lookup(key) {
            metrics::counter!("permweave_cached_data_hits_total", "kind" => C::NAME).increment(1);
            return value;
        }
        metrics::counter!("permweave_cached_data_misses_total", "kind" => C::NAME).increment(1);

        let (_active, ticket) = self.container.begin();
        match C::calculate(self.source.as_ref(), key) {
            Ok(value) => {
                let value = Arc::new(value);
                self.container.install(key, ticket, Arc::clone(&value));
                value
            }
            Err(e) => {
                warn!(kind = C::NAME, ?key, error = %e, "failed to calculate cached data, serving empty data");
                Arc::new(C::empty(key))
            }
        }
    }

    fn calculate(&self, key: &C::Key) -> DomainResult<C::Value> {
        C::calculate(self.source.as_ref(), key)
    }

    fn pre_calculate(&self, key: &C::Key) -> DomainResult<()> {
        if self.container.lookup(key).is_some() {
            return Ok(());
        }
        let (_active, ticket) = self.container.begin();
        let value = C::calculate(self.source.as_ref(), key)?;
        self.container.install(key, ticket, Arc::new(value));
        Ok(())
    }

    fn recalculate(&self, key: C::Key) -> JoinHandle<()> {
        let (active, ticket) = self.container.begin();
        let container = Arc::clone(&self.container);
        let source = Arc::clone(&self.source);
        metrics::counter!("permweave_cached_data_recalculations_total", "kind" => C::NAME)
            .increment(1);

        tokio::task::spawn_blocking(move || {
            let _active = active;
            match C::calculate(source.as_ref(), &key) {
                Ok(value) => {
                    container.install(&key, ticket, Arc::new(value));
                }
                Err(e) => {
                    warn!(kind = C::NAME, ?key, error = %e, "background recalculation failed");
                }
            }
        })
    }

    fn recalculate_all(&self) -> JoinHandle<()> {
        let handles: Vec<_> = self
            .container
            .keys()
            .into_iter()
            .map(|key| self.recalculate(key))
            .collect();
        tokio::spawn(async move {
            for result in join_all(handles).await {
                if let Err(e) = result {
                    warn!(kind = C::NAME, error = %e, "recalculation task panicked");
                }
            }
        })
    }

    fn reload(
        &self,
        key: C::Key,
    ) -> impl Future<Output = DomainResult<Arc<C::Value>>> + Send + 'static {
        self.container.invalidate(&key);
        let (active, ticket) = self.container.begin();
        let container = Arc::clone(&self.container);
        let source = Arc::clone(&self.source);
        metrics::counter!("permweave_cached_data_recalculations_total", "kind" => C::NAME)
            .increment(1);

        let handle = tokio::task::spawn_blocking(move || {
            let _active = active;
            let value = Arc::new(C::calculate(source.as_ref(), &key).map_err(|e| {
                warn!(kind = C::NAME, ?key, error = %e, "reload failed, entry left absent");
                e
            })?);
            container.install(&key, ticket, Arc::clone(&value));
            Ok(value)
        });

        async move {
            handle.await.map_err(|e| DomainError::ComputationFailed {
                message: format!("reload task failed: {e}"),
            })?
        }
    }

    fn reload_all(&self) -> impl Future<Output = DomainResult<()>> + Send + 'static {
        let reloads: Vec<_> = self
            .container
            .keys()
            .into_iter()
            .map(|key| self.reload(key))
            .collect();
        async move {
            for result in join_all(reloads).await {
                result?;
            }
            Ok(())
        }
    }
}

/// Cached permission and meta data for one holder.
pub struct CachedData {
    permissions: Cache<PermissionKind>,
    meta: Cache<MetaKind>,
    config: CachedDataConfig,
}

impl std::fmt::Debug for CachedData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedData")
            .field("permissions", &self.permissions.container)
            .field("meta", &self.meta.container)
            .field("config", &self.config)
            .finish()
    }
}

impl CachedData {
    pub fn new(source: Arc<dyn CacheDataSource>, config: CachedDataConfig) -> Self {
        Self {
            permissions: Cache::new(Arc::clone(&source), &config),
            meta: Cache::new(source, &config),
            config,
        }
    }

    pub fn config(&self) -> &CachedDataConfig {
        &self.config
    }

    // ------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------

    /// Cached permission data, computing it synchronously on a miss.
    pub fn get_permission_data(&self, query: &QueryOptions) -> Arc<PermissionData> {
        self.permissions.get(query)
    }

    /// Cached meta data, computing it synchronously on a miss.
    pub fn get_meta_data(&self, contexts: &MetaContexts) -> Arc<MetaData> {
        self.meta.get(contexts)
    }

    /// Meta data keyed with the configured stack definitions.
    pub fn get_meta_data_for(&self, query: &QueryOptions) -> Arc<MetaData> {
        let contexts = self.meta.source.meta_contexts_for(query);
        self.meta.get(&contexts)
    }

    /// Computes permission data without touching the cache.
    pub fn calculate_permissions(&self, query: &QueryOptions) -> DomainResult<PermissionData> {
        self.permissions.calculate(query)
    }

    /// Computes meta data without touching the cache.
    pub fn calculate_meta(&self, contexts: &MetaContexts) -> DomainResult<MetaData> {
        self.meta.calculate(contexts)
    }

    /// Ensures both permission and meta data for `query` are cached.
    pub fn pre_calculate(&self, query: &QueryOptions) -> DomainResult<()> {
        self.permissions.pre_calculate(query)?;
        let contexts = self.meta.source.meta_contexts_for(query);
        self.meta.pre_calculate(&contexts)
    }

    // ------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------

    /// Recomputes in the background, serving the old value until done.
    ///
    /// Returns a handle that can be used to wait for completion if needed.
    pub fn recalculate_permissions(&self, query: QueryOptions) -> JoinHandle<()> {
        self.permissions.recalculate(query)
    }

    /// Returns a handle that can be used to wait for completion if needed.
    pub fn recalculate_meta(&self, contexts: MetaContexts) -> JoinHandle<()> {
        self.meta.recalculate(contexts)
    }

    /// Recalculates every currently cached permission entry.
    pub fn recalculate_all_permissions(&self) -> JoinHandle<()> {
        self.permissions.recalculate_all()
    }

    pub fn recalculate_all_meta(&self) -> JoinHandle<()> {
        self.meta.recalculate_all()
    }

    /// Drops the entry now and recomputes it in the background. The work
    /// starts immediately; the returned future yields the new value.
    pub fn reload_permissions(
        &self,
        query: QueryOptions,
    ) -> impl Future<Output = DomainResult<Arc<PermissionData>>> + Send + 'static {
        self.permissions.reload(query)
    }

    pub fn reload_meta(
        &self,
        contexts: MetaContexts,
    ) -> impl Future<Output = DomainResult<Arc<MetaData>>> + Send + 'static {
        self.meta.reload(contexts)
    }

    /// Reloads every currently cached permission entry.
    pub fn reload_all_permissions(&self) -> impl Future<Output = DomainResult<()>> + Send + 'static {
        self.permissions.reload_all()
    }

    pub fn reload_all_meta(&self) -> impl Future<Output = DomainResult<()>> + Send + 'static {
        self.meta.reload_all()
    }

    // ------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------

    pub fn invalidate_permissions(&self, query: &QueryOptions) {
        self.permissions.container.invalidate(query);
    }

    pub fn invalidate_meta(&self, contexts: &MetaContexts) {
        self.meta.container.invalidate(contexts);
    }

    pub fn invalidate_all_permissions(&self) {
        self.permissions.container.invalidate_all();
    }

    pub fn invalidate_all_meta(&self) {
        self.meta.container.invalidate_all();
    }

    /// Drops every permission and meta entry.
    pub fn invalidate(&self) {
        self.invalidate_all_permissions();
        self.invalidate_all_meta();
    }

    /// Clears the lookup memo and processor state of every cached
    /// calculator without dropping the entries.
    pub fn invalidate_permission_calculators(&self) {
        for data in self.permissions.container.values() {
            data.invalidate_cache();
        }
    }

    /// Evicts entries idle longer than `expire_after_access`. Returns the
    /// number of entries removed.
    pub fn perform_cleanup(&self) -> usize {
        let removed = self.permissions.container.cleanup() + self.meta.container.cleanup();
        if removed > 0 {
            debug!(removed, "cached data cleanup");
        }
        removed
    }

    pub fn cached_permission_keys(&self) -> Vec<QueryOptions> {
        self.permissions.container.keys()
    }

    pub fn cached_meta_keys(&self) -> Vec<MetaContexts> {
        self.meta.container.keys()
    }

    /// Number of live permission and meta entries.
    pub fn len(&self) -> usize {
        self.permissions.container.len() + self.meta.container.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registers cached data metrics descriptions.
///
/// Call this function once during application startup.
///
/// # Metrics Registered
///
/// - `permweave_cached_data_hits_total` - Cache hits, labelled by `kind`
/// - `permweave_cached_data_misses_total` - Cache misses, labelled by `kind`
/// - `permweave_cached_data_recalculations_total` - Background refreshes started
/// - `permweave_cached_data_stale_writes_discarded_total` - Results dropped by the stale-write guard
/// - `permweave_permission_checks_total` - Permission checks, labelled by `result`
pub fn register_cached_data_metrics() {
    metrics::describe_counter!(
        "permweave_cached_data_hits_total",
        "Total number of cached data hits"
    );
    metrics::describe_counter!(
        "permweave_cached_data_misses_total",
        "Total number of cached data misses"
    );
    metrics::describe_counter!(
        "permweave_cached_data_recalculations_total",
        "Total number of background cached data refreshes"
    );
    metrics::describe_counter!(
        "permweave_cached_data_stale_writes_discarded_total",
        "Total number of computed results discarded because they predate an invalidation"
    );
    metrics::describe_counter!(
        "permweave_permission_checks_total",
        "Total number of permission checks"
    );
}
