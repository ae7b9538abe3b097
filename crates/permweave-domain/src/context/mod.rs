//! Contexts: where a node applies and what a query asks about.
//!
//! - [`ContextSet`] is an immutable, order-independent bag of key/value
//!   pairs (`server`, `world`, or any custom key).
//! - [`QueryOptions`] combine the active contexts with inclusion flags and a
//!   [`ContextSatisfyMode`]; they key the permission cache.
//! - [`MetaContexts`] add the prefix/suffix stack definitions and key the
//!   meta cache.

mod query;
mod set;
mod set_proptest;

pub use query::{Flag, MetaContexts, QueryFlags, QueryMode, QueryOptions};
pub use set::{
    ContextSatisfyMode, ContextSet, ContextSetBuilder, GLOBAL_VALUE, SERVER_KEY, WORLD_KEY,
};
