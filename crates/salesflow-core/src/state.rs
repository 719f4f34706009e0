//! Keyed running-total store.
//!
//! Each aggregator owns exactly one store. Totals live in an arena of slots;
//! a hash index maps keys to slot ids and freed slots are recycled, so eviction
//! does not shift or reallocate the remaining entries.
//!
//! ```text
//! index: HashMap<K, SlotId>        slots: Vec<Option<Slot<K>>>
//!   2024-01-05/Books  ──► 0          [0] Some{key, total: 20.0,  folds: 1}
//!   2024-01-05/Elec.  ──► 1          [1] Some{key, total: 150.0, folds: 2}
//!                                    [2] None   ◄── free list
//! ```

use std::collections::HashMap;
use std::hash::Hash;

/// Index of a slot inside a [`KeyedStateStore`].
pub type SlotId = usize;

/// Combines the running total with a new amount.
pub type MergeFn = fn(f64, f64) -> f64;

/// The default merge: addition.
pub fn sum(running: f64, amount: f64) -> f64 {
    running + amount
}

#[derive(Debug, Clone)]
struct Slot<K> {
    key: K,
    total: f64,
    folds: u64,
}

impl<K> Slot<K> {
    fn empty(key: K) -> Self {
        Self {
            key,
            total: 0.0,
            folds: 0,
        }
    }
}

/// Arena-backed map from key to running total.
#[derive(Debug, Clone)]
pub struct KeyedStateStore<K> {
    index: HashMap<K, SlotId>,
    slots: Vec<Option<Slot<K>>>,
    free: Vec<SlotId>,
}

impl<K: Clone + Eq + Hash> KeyedStateStore<K> {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Fold `amount` into the total for `key` and return the new total.
    ///
    /// An unseen key starts at zero.
    pub fn fold(&mut self, key: &K, amount: f64, merge: MergeFn) -> f64 {
        let id = match self.index.get(key) {
            Some(&id) => id,
            None => self.allocate(key.clone()),
        };
        let slot = self.slots[id].get_or_insert_with(|| Slot::empty(key.clone()));
        slot.total = merge(slot.total, amount);
        debug_assert!(slot.total.is_finite(), "running total is no longer finite");
        slot.folds += 1;
        slot.total
    }

    fn allocate(&mut self, key: K) -> SlotId {
        let slot = Some(Slot::empty(key.clone()));
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id] = slot;
                id
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        self.index.insert(key, id);
        id
    }

    /// Current running total for `key`.
    pub fn get(&self, key: &K) -> Option<f64> {
        self.slot(key).map(|s| s.total)
    }

    /// Number of transactions folded into `key`.
    pub fn folds(&self, key: &K) -> Option<u64> {
        self.slot(key).map(|s| s.folds)
    }

    fn slot(&self, key: &K) -> Option<&Slot<K>> {
        self.index
            .get(key)
            .and_then(|&id| self.slots.get(id))
            .and_then(Option::as_ref)
    }

    /// Remove every key matching `predicate`. Returns how many were removed.
    pub fn evict_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let doomed: Vec<(K, SlotId)> = self
            .index
            .iter()
            .filter(|(k, _)| predicate(k))
            .map(|(k, &id)| (k.clone(), id))
            .collect();

        for (key, id) in &doomed {
            self.index.remove(key);
            self.slots[*id] = None;
            self.free.push(*id);
        }
        doomed.len()
    }

    /// Iterate over `(key, total)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, f64)> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref().map(|s| (&s.key, s.total)))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl<K: Clone + Eq + Hash> Default for KeyedStateStore<K> {
    fn default() -> Self {
        Self::new()
    }
}
