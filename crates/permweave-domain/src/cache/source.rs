use std::fmt::Debug;

use crate::calculator::PermissionData;
use crate::context::{MetaContexts, QueryOptions};
use crate::error::DomainResult;
use crate::metastack::MetaData;

/// Computes fresh permission and meta data for one holder.
///
/// Calls run on blocking threads during background refreshes, so
/// implementations must not assume an async context.
pub trait CacheDataSource: Send + Sync + Debug + 'static {
    fn calculate_permissions(&self, query: &QueryOptions) -> DomainResult<PermissionData>;

    fn calculate_meta(&self, contexts: &MetaContexts) -> DomainResult<MetaData>;

    /// Meta cache key for a query, using the configured stack definitions.
    fn meta_contexts_for(&self, query: &QueryOptions) -> MetaContexts;
}
