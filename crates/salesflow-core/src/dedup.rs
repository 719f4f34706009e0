//! Replay window for at-least-once delivery.
//!
//! The transport may deliver the same transaction more than once (consumer
//! restarts, rebalances, producer retries). Folding a re-delivered transaction
//! again would inflate every running total it touches, so each aggregator
//! remembers the most recent `(transaction_id, key)` pairs it has folded and
//! skips repeats.
//!
//! Memory is bounded by an LRU: once `capacity` pairs are tracked the least
//! recently seen pair is forgotten, and a duplicate arriving after its pair was
//! evicted is folded again. A capacity of zero disables the window entirely,
//! which reproduces plain at-least-once double counting.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

/// Outcome of checking a transaction against the replay window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
    /// Never seen (or already forgotten): fold it.
    First,
    /// Already folded into this key: skip it.
    Repeat,
}

/// Counters exposed for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub tracked: usize,
    pub capacity: usize,
    pub first: u64,
    pub repeats: u64,
}

/// Bounded LRU of `(transaction_id, key)` pairs.
pub struct ReplayWindow<K: Hash + Eq> {
    cache: Option<LruCache<(String, K), ()>>,
    capacity: usize,
    first: u64,
    repeats: u64,
}

impl<K: Hash + Eq + Clone> ReplayWindow<K> {
    /// Create a window tracking at most `capacity` pairs. Zero disables it.
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(LruCache::new),
            capacity,
            first: 0,
            repeats: 0,
        }
    }

    /// A window that never reports repeats.
    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Record `(transaction_id, key)` and report whether it was new.
    pub fn observe(&mut self, transaction_id: &str, key: &K) -> Sighting {
        let Some(cache) = self.cache.as_mut() else {
            self.first += 1;
            return Sighting::First;
        };

        let pair = (transaction_id.to_string(), key.clone());
        if cache.get(&pair).is_some() {
            self.repeats += 1;
            Sighting::Repeat
        } else {
            cache.put(pair, ());
            self.first += 1;
            Sighting::First
        }
    }

    /// Forget every pair whose key matches `predicate`.
    pub fn forget_where<F>(&mut self, mut predicate: F)
    where
        F: FnMut(&K) -> bool,
    {
        if let Some(cache) = self.cache.as_mut() {
            let doomed: Vec<(String, K)> = cache
                .iter()
                .filter(|((_, k), _)| predicate(k))
                .map(|(pair, _)| pair.clone())
                .collect();
            for pair in doomed {
                cache.pop(&pair);
            }
        }
    }

    pub fn stats(&self) -> ReplayStats {
        ReplayStats {
            tracked: self.cache.as_ref().map_or(0, |c| c.len()),
            capacity: self.capacity,
            first: self.first,
            repeats: self.repeats,
        }
    }
}
