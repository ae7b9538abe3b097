//! Meta accumulation and prefix/suffix stacking.
//!
//! # Architecture
//!
//! ```text
//!  traversal order                 MetaAccumulator
//! ─────────────────►  ┌────────────────────────────────────────┐
//!  meta / prefix /    │ meta multimap (first value first)      │
//!  suffix nodes,      │ prefixes / suffixes by priority (desc) │
//!  group weights      │ prefix MetaStack ─┐  suffix MetaStack ─┤
//!                     │   element winners │    element winners │
//!                     └───────────────────┴────────────────────┘
//!                                   │ complete()
//!                                   ▼
//!                               MetaData
//! ```
//!
//! A [`MetaStackDefinition`] is an ordered list of [`StackElement`]s. Each
//! element keeps one winner; the formatted prefix or suffix is the winners
//! joined with the definition's spacers.

mod accumulator;
mod data;
mod definition;
mod element;

pub use accumulator::{ChatMetaMap, MetaAccumulator, MetaMultimap};
pub use data::{MetaData, MetaValueSelector};
pub use definition::{DuplicateRemoval, MetaStack, MetaStackDefinition};
pub use element::{ChatMetaEntry, OriginFilter, PriorityRule, StackElement};
