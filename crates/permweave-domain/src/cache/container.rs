//! A single concurrent cache container (permission or meta).
//!
//! Values live in a Moka cache with idle expiry and a capacity bound, so an
//! entry idle longer than `expire_after_access` is never served again even
//! before cleanup evicts it.
//!
//! # Stale-write guard
//!
//! Every computation takes a ticket from a monotonic clock before it reads
//! holder data. Invalidations record a newer ticket for the key (a
//! tombstone, kept in a secondary index), and `invalidate_all` raises a
//! floor. A finished computation installs its result only if its ticket is
//! newer than the floor, the tombstone and the stored entry. Installs and
//! single-key invalidations both run as Moka compute operations, so they
//! are serialized per key.
//!
//! Tombstones are dropped by cleanup once no computation that could lose
//! against them is still in flight.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::notification::RemovalCause;
use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;
use tracing::debug;

use super::source::CacheDataSource;
use crate::error::DomainResult;

/// Binds a key and value type to the data source call that computes them.
pub trait CacheKind: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    type Value: Send + Sync + 'static;

    /// Metric label and log name.
    const NAME: &'static str;

    fn calculate(source: &dyn CacheDataSource, key: &Self::Key) -> DomainResult<Self::Value>;

    /// Value served when computation fails.
    fn empty(key: &Self::Key) -> Self::Value;
}

/// A cached value and the ticket of the computation that produced it.
struct Stamped<V> {
    value: Arc<V>,
    stamp: u64,
}

impl<V> Clone for Stamped<V> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            stamp: self.stamp,
        }
    }
}

/// Decrements the in-flight counter when a computation ends, however it ends.
pub(crate) struct ActiveComputation {
    active: Arc<AtomicUsize>,
}

impl Drop for ActiveComputation {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct Container<C: CacheKind> {
    entries: Cache<C::Key, Stamped<C::Value>>,
    tombstones: DashMap<C::Key, u64>,
    clock: AtomicU64,
    floor: AtomicU64,
    active: Arc<AtomicUsize>,
    evicted: Arc<AtomicUsize>,
}

impl<C: CacheKind> fmt::Debug for Container<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("kind", &C::NAME)
            .field("entry_count", &self.entries.entry_count())
            .field("tombstones", &self.tombstones.len())
            .field("active_computations", &self.active.load(Ordering::SeqCst))
            .finish()
    }
}

impl<C: CacheKind> Container<C> {
    pub(crate) fn new(expire_after_access: Duration, max_entries: u64) -> Self {
        let evicted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&evicted);
        let entries: Cache<C::Key, Stamped<C::Value>> = Cache::builder()
            .max_capacity(max_entries)
            .time_to_idle(expire_after_access)
            .eviction_listener(move |_key, _value, cause: RemovalCause| {
                if cause.was_evicted() {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            })
            .build();

        Self {
            entries,
            tombstones: DashMap::new(),
            clock: AtomicU64::new(0),
            floor: AtomicU64::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            evicted,
        }
    }

    fn next_ticket(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Registers an in-flight computation and takes its ticket, in that
    /// order, so cleanup never drops a tombstone a pending result must lose
    /// against.
    pub(crate) fn begin(&self) -> (ActiveComputation, u64) {
        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveComputation {
            active: Arc::clone(&self.active),
        };
        (guard, self.next_ticket())
    }

    // ------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------

    /// Cached value for `key`. Reading resets its idle timer.
    pub(crate) fn lookup(&self, key: &C::Key) -> Option<Arc<C::Value>> {
        self.entries.get(key).map(|stamped| stamped.value)
    }

    /// Every key holding a live value.
    pub(crate) fn keys(&self) -> Vec<C::Key> {
        self.entries.iter().map(|(key, _)| (*key).clone()).collect()
    }

    pub(crate) fn values(&self) -> Vec<Arc<C::Value>> {
        self.entries.iter().map(|(_, stamped)| stamped.value).collect()
    }

    // ------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------

    /// Installs a computed value unless an invalidation happened after
    /// `ticket` was taken. Returns whether the value was installed.
    pub(crate) fn install(&self, key: &C::Key, ticket: u64, value: Arc<C::Value>) -> bool {
        let result = self.entries.entry(key.clone()).and_compute_with(|current| {
            let floor = self.floor.load(Ordering::SeqCst);
            let tombstone = self.tombstones.get(key).map_or(0, |stamp| *stamp);
            let stored = current.map_or(0, |entry| entry.value().stamp);
            if ticket <= floor.max(tombstone).max(stored) {
                Op::Nop
            } else {
                Op::Put(Stamped {
                    value,
                    stamp: ticket,
                })
            }
        });

        let mut installed = matches!(result, CompResult::Inserted(_) | CompResult::ReplacedWith(_));
        if installed && ticket <= self.floor.load(Ordering::SeqCst) {
            // invalidate_all ran between the write and now.
            self.entries
                .entry(key.clone())
                .and_compute_with(|current| match current {
                    Some(entry) if entry.value().stamp == ticket => Op::Remove,
                    _ => Op::Nop,
                });
            installed = false;
        }

        if !installed {
            debug!(kind = C::NAME, ?key, ticket, "discarding stale cache write");
            metrics::counter!("permweave_cached_data_stale_writes_discarded_total", "kind" => C::NAME)
                .increment(1);
        }
        installed
    }

    /// Removes the entry, leaving a tombstone stamped with a fresh ticket.
    pub(crate) fn invalidate(&self, key: &C::Key) {
        let ticket = self.next_ticket();
        self.entries.entry(key.clone()).and_compute_with(|_| {
            self.tombstones.insert(key.clone(), ticket);
            Op::Remove
        });
    }

    pub(crate) fn invalidate_all(&self) {
        let ticket = self.next_ticket();
        self.floor.fetch_max(ticket, Ordering::SeqCst);
        self.entries.invalidate_all();
        self.tombstones.retain(|_, stamp| *stamp > ticket);
    }

    /// Evicts expired entries and drops tombstones no pending computation
    /// can lose against. Returns the number of entries evicted.
    pub(crate) fn cleanup(&self) -> usize {
        let before = self.evicted.load(Ordering::Relaxed);
        self.entries.run_pending_tasks();

        // A computation holding a ticket at or below the horizon registered
        // before the horizon was read, so it is counted in `active`.
        let horizon = self.clock.load(Ordering::SeqCst);
        if self.active.load(Ordering::SeqCst) == 0 {
            self.tombstones.retain(|_, stamp| *stamp > horizon);
        }

        self.evicted.load(Ordering::Relaxed).saturating_sub(before)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.iter().count()
    }

    pub(crate) fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }
}
