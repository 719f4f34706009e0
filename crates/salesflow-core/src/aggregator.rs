//! Keyed incremental aggregation.
//!
//! A [`KeyedAggregator`] maintains `key -> running total` for one roll-up.
//! Every validated transaction is folded in with [`KeyedAggregator::apply`],
//! which returns the key's new total so it can be upserted downstream. The
//! stored value is always the *current accumulated total*, never a delta, which
//! is what makes the downstream write safe to retry.
//!
//! ## Ordering
//!
//! Merge is addition, so the final total for a key does not depend on arrival
//! order, only the intermediate values emitted along the way do. All
//! transactions sharing a key must reach the same aggregator instance: the
//! state is local memory and is never shared.
//!
//! ## Replays
//!
//! A [`ReplayWindow`] skips `(transaction_id, key)` pairs that were already
//! folded. With the window disabled a re-delivered transaction is added again.
//!
//! ## Retention
//!
//! With a [`RetentionPolicy`] horizon the aggregator tracks a watermark (the
//! latest event day seen). Keys that ended more than `horizon_days` before the
//! watermark are dropped by [`KeyedAggregator::evict_expired`], and events still
//! addressed to them are reported as [`FoldOutcome::Late`] instead of
//! restarting the key at zero, which would overwrite a larger persisted total.

use std::fmt;

use chrono::{Days, NaiveDate};

use crate::dedup::{ReplayStats, ReplayWindow, Sighting};
use crate::keys::AggregationKey;
use crate::state::{sum, KeyedStateStore, MergeFn};
use crate::transaction::Transaction;

/// A key's freshly updated running total, ready for its persistence sink.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateUpdate<K> {
    pub key: K,
    pub total: f64,
}

/// What happened when a transaction was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum FoldOutcome<K> {
    /// The total changed; persist it.
    Updated(AggregateUpdate<K>),
    /// The replay window had already folded this transaction into this key.
    Duplicate,
    /// The key is older than the retention horizon and was not touched.
    Late,
}

/// How long keys are kept in memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Keys ending more than this many days before the watermark are evicted.
    /// `None` keeps every key for the lifetime of the process.
    pub horizon_days: Option<u64>,
}

impl RetentionPolicy {
    pub fn unbounded() -> Self {
        Self { horizon_days: None }
    }

    pub fn days(days: u64) -> Self {
        Self {
            horizon_days: Some(days),
        }
    }
}

/// Counters for one aggregator instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub keys: usize,
    pub applied: u64,
    pub duplicates: u64,
    pub late: u64,
    pub evicted: u64,
    pub replay: ReplayStats,
}

/// Running totals for one roll-up, keyed by `K`.
pub struct KeyedAggregator<K: AggregationKey> {
    state: KeyedStateStore<K>,
    merge: MergeFn,
    replay: ReplayWindow<K>,
    retention: RetentionPolicy,
    watermark: Option<NaiveDate>,
    applied: u64,
    duplicates: u64,
    late: u64,
    evicted: u64,
}

impl<K: AggregationKey> KeyedAggregator<K> {
    /// Summing aggregator with no replay window and no retention.
    pub fn new() -> Self {
        Self::with_merge(sum)
    }

    /// Aggregator using a custom merge function.
    pub fn with_merge(merge: MergeFn) -> Self {
        Self {
            state: KeyedStateStore::new(),
            merge,
            replay: ReplayWindow::disabled(),
            retention: RetentionPolicy::unbounded(),
            watermark: None,
            applied: 0,
            duplicates: 0,
            late: 0,
            evicted: 0,
        }
    }

    /// Track up to `capacity` `(transaction_id, key)` pairs for replay detection.
    pub fn with_replay_window(mut self, capacity: usize) -> Self {
        self.replay = ReplayWindow::new(capacity);
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn name(&self) -> &'static str {
        K::NAME
    }

    /// Fold one transaction into its key.
    pub fn apply(&mut self, tx: &Transaction) -> FoldOutcome<K> {
        let key = K::extract(tx);

        let day = tx.event_day();
        if self.watermark.map_or(true, |w| day > w) {
            self.watermark = Some(day);
        }

        if let Some(horizon) = self.horizon() {
            if key.last_day() < horizon {
                self.late += 1;
                tracing::debug!(
                    aggregator = K::NAME,
                    key = %key,
                    transaction_id = %tx.transaction_id,
                    horizon = %horizon,
                    "event is older than the retention horizon, not folded"
                );
                return FoldOutcome::Late;
            }
        }

        if self.replay.observe(&tx.transaction_id, &key) == Sighting::Repeat {
            self.duplicates += 1;
            tracing::debug!(
                aggregator = K::NAME,
                key = %key,
                transaction_id = %tx.transaction_id,
                "skipping replayed transaction"
            );
            return FoldOutcome::Duplicate;
        }

        let total = self.state.fold(&key, tx.total_amount, self.merge);
        self.applied += 1;
        FoldOutcome::Updated(AggregateUpdate { key, total })
    }

    /// Oldest day still retained, if retention is bounded and a watermark exists.
    pub fn horizon(&self) -> Option<NaiveDate> {
        let days = self.retention.horizon_days?;
        let watermark = self.watermark?;
        Some(
            watermark
                .checked_sub_days(Days::new(days))
                .unwrap_or(NaiveDate::MIN),
        )
    }

    /// Drop keys that fell behind the retention horizon.
    ///
    /// Callers must only evict once the evicted totals were durably written.
    pub fn evict_expired(&mut self) -> usize {
        let Some(horizon) = self.horizon() else {
            return 0;
        };
        let removed = self.state.evict_where(|k| k.last_day() < horizon);
        self.replay.forget_where(|k| k.last_day() < horizon);
        if removed > 0 {
            self.evicted += removed as u64;
            tracing::info!(
                aggregator = K::NAME,
                removed,
                horizon = %horizon,
                remaining = self.state.len(),
                "evicted expired aggregation keys"
            );
        }
        removed
    }

    pub fn total(&self, key: &K) -> Option<f64> {
        self.state.get(key)
    }

    /// Snapshot of every `(key, total)` currently held.
    pub fn snapshot(&self) -> Vec<AggregateUpdate<K>> {
        self.state
            .iter()
            .map(|(key, total)| AggregateUpdate {
                key: key.clone(),
                total,
            })
            .collect()
    }

    pub fn watermark(&self) -> Option<NaiveDate> {
        self.watermark
    }

    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            keys: self.state.len(),
            applied: self.applied,
            duplicates: self.duplicates,
            late: self.late,
            evicted: self.evicted,
            replay: self.replay.stats(),
        }
    }
}

impl<K: AggregationKey> Default for KeyedAggregator<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: AggregationKey> fmt::Debug for KeyedAggregator<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedAggregator")
            .field("name", &K::NAME)
            .field("keys", &self.state.len())
            .field("watermark", &self.watermark)
            .field("retention", &self.retention)
            .finish()
    }
}
