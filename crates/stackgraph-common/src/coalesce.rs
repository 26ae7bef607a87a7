//! Key-scoped memoization with request coalescing.
//!
//! [`CoalescingMap`] maps a key to a slot holding at most one computed
//! value. The first caller for a key runs the computation; concurrent
//! callers for the same key block on the slot and receive the same
//! `Arc`. A stale value (as judged by the caller's freshness check) is
//! replaced by a fresh slot, so readers that already hold the old `Arc`
//! keep a consistent view while new callers recompute.
//!
//! Synchronization is per shard of a [`DashMap`], never a global lock,
//! and no map guard is held while a computation runs.

use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

type Slot<V> = Arc<OnceLock<Arc<V>>>;

/// A memo table whose entries are computed once per key, even under
/// concurrent requests.
#[derive(Debug)]
pub struct CoalescingMap<K, V>
where
    K: Eq + Hash,
{
    slots: DashMap<K, Slot<V>>,
    computations: AtomicUsize,
}

impl<K, V> CoalescingMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            computations: AtomicUsize::new(0),
        }
    }

    /// Returns the value for `key`, computing it if absent or stale.
    ///
    /// `is_fresh` is consulted for an already-computed value; returning
    /// `false` discards it. `compute` runs at most once per slot.
    pub fn get_or_compute<F, C>(&self, key: &K, is_fresh: F, compute: C) -> Arc<V>
    where
        F: Fn(&V) -> bool,
        C: FnOnce() -> V,
    {
        let slot = self.slot_for(key, &is_fresh);
        let value = slot.get_or_init(|| {
            let _ = self.computations.fetch_add(1, Ordering::Relaxed);
            Arc::new(compute())
        });
        Arc::clone(value)
    }

    /// Returns the current value for `key` without computing anything.
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        let slot = self.slots.get(key).map(|s| Arc::clone(s.value()))?;
        slot.get().cloned()
    }

    /// Drops the entry for `key` if it still holds `value`.
    ///
    /// Used to avoid committing results of an aborted computation.
    pub fn discard(&self, key: &K, value: &Arc<V>) {
        let _ = self.slots.remove_if(key, |_, slot| {
            slot.get().is_some_and(|current| Arc::ptr_eq(current, value))
        });
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.slots.clear();
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no entry is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total number of computations run since construction.
    #[must_use]
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }

    fn slot_for<F>(&self, key: &K, is_fresh: &F) -> Slot<V>
    where
        F: Fn(&V) -> bool,
    {
        let existing = self.slots.get(key).map(|s| Arc::clone(s.value()));
        let Some(slot) = existing else {
            return Arc::clone(self.slots.entry(key.clone()).or_default().value());
        };

        match slot.get() {
            Some(value) if !is_fresh(value) => {}
            _ => return slot,
        }

        tracing::trace!("replacing stale cache slot");
        let mut entry = self.slots.entry(key.clone()).or_default();
        if Arc::ptr_eq(entry.value(), &slot) {
            *entry.value_mut() = Slot::default();
        }
        Arc::clone(entry.value())
    }
}

impl<K, V> Default for CoalescingMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
