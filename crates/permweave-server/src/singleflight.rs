//! Deduplication of concurrent loads of the same holder.

use std::hash::Hash;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;

/// Outcome shared with followers. Errors travel as their display text.
pub type Shared<V> = Result<V, String>;

/// Result of trying to acquire a singleflight slot.
pub enum Slot<V> {
    /// This caller runs the operation and broadcasts its outcome.
    Leader(broadcast::Sender<Shared<V>>),
    /// Another caller is running it; wait for its outcome.
    Follower(broadcast::Receiver<Shared<V>>),
}

/// Collapses concurrent operations on the same key into one.
pub struct Singleflight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    in_flight: DashMap<K, broadcast::Sender<Shared<V>>>,
}

impl<K, V> Singleflight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }

    /// Atomically joins an in-flight operation or registers a new one.
    pub fn acquire(&self, key: K) -> Slot<V> {
        match self.in_flight.entry(key) {
            Entry::Occupied(entry) => Slot::Follower(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                Slot::Leader(tx)
            }
        }
    }

    fn complete(&self, key: &K) {
        self.in_flight.remove(key);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl<K, V> Default for Singleflight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the in-flight registration when dropped, so a cancelled or
/// panicking leader does not wedge later callers.
pub struct SingleflightGuard<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    singleflight: &'a Singleflight<K, V>,
    key: K,
    completed: bool,
}

impl<'a, K, V> SingleflightGuard<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(singleflight: &'a Singleflight<K, V>, key: K) -> Self {
        Self {
            singleflight,
            key,
            completed: false,
        }
    }

    /// Unregisters, then hands the outcome to every follower.
    ///
    /// Followers subscribe while the registration exists, so each of them
    /// is subscribed before the send.
    pub fn complete(mut self, tx: &broadcast::Sender<Shared<V>>, outcome: Shared<V>) {
        self.singleflight.complete(&self.key);
        self.completed = true;
        // No receivers is fine.
        let _ = tx.send(outcome);
    }
}

impl<K, V> Drop for SingleflightGuard<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.completed {
            self.singleflight.complete(&self.key);
        }
    }
}
