//! Pipeline counters.
//!
//! Shared through an `Arc` so the binary can report progress while the
//! pipeline task owns everything else.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Records handed out by the source.
    pub received: AtomicU64,
    /// Records whose payload did not decode.
    pub malformed: AtomicU64,
    /// Records that decoded but failed validation.
    pub rejected: AtomicU64,
    /// Validated transactions fanned out to the sinks.
    pub processed: AtomicU64,
    /// Aggregator folds skipped by the replay window.
    pub duplicates: AtomicU64,
    /// Aggregator folds skipped because the key was past retention.
    pub late: AtomicU64,
    /// Search mirror batches shed because the branch was backed up.
    pub shed: AtomicU64,
    /// Keys evicted from the aggregators.
    pub evicted: AtomicU64,
    /// Successful checkpoints (flush + offset commit).
    pub checkpoints: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub malformed: u64,
    pub rejected: u64,
    pub processed: u64,
    pub duplicates: u64,
    pub late: u64,
    pub shed: u64,
    pub evicted: u64,
    pub checkpoints: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            late: self.late.load(Ordering::Relaxed),
            shed: self.shed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Records dropped before reaching aggregation.
    pub fn dropped(&self) -> u64 {
        self.malformed + self.rejected
    }
}
