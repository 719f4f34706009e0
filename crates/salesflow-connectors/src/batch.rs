//! Write batching for sink connectors.
//!
//! Rows are accumulated in memory until a size or time threshold is met and
//! then written as one statement. The buffer coalesces by key: a row whose key
//! is already buffered replaces the earlier row in place, keeping the earlier
//! row's position.
//!
//! ```text
//! ┌──────────────┐
//! │  put(rows)   │ SinkConnector API
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────────────────────┐
//! │  BatchBuffer<K, V>           │
//! │  - index: HashMap<K, usize>  │
//! │  - rows: Vec<V>              │
//! │  - created_at: Instant       │
//! └──────┬───────────────────────┘
//!        │
//!        ├─→ Flush on size (batch.size distinct keys)
//!        ├─→ Flush on time (batch.interval.ms)
//!        └─→ Flush on explicit flush() call
//! ```
//!
//! Coalescing is required, not an optimization: a multi-row
//! `INSERT ... ON CONFLICT DO UPDATE` fails if two rows in the same statement
//! hit the same conflict target. Because every row carries the full current
//! value for its key (never a delta), keeping only the latest is lossless.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tracing::trace;

/// Key-coalescing buffer of pending rows.
///
/// NOT thread-safe; each sink connector owns its buffer.
#[derive(Debug)]
pub struct BatchBuffer<K, V> {
    index: HashMap<K, usize>,
    rows: Vec<V>,
    created_at: Instant,
    max_batch_size: usize,
    linger: Duration,
    coalesced: u64,
}

impl<K: Hash + Eq, V> BatchBuffer<K, V> {
    /// Create an empty buffer flushing at `max_batch_size` rows or after `linger`.
    pub fn new(max_batch_size: usize, linger: Duration) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            index: HashMap::with_capacity(max_batch_size),
            rows: Vec::with_capacity(max_batch_size),
            created_at: Instant::now(),
            max_batch_size,
            linger,
            coalesced: 0,
        }
    }

    /// Buffer a row, replacing any pending row with the same key.
    ///
    /// Returns `true` if an earlier row was replaced.
    pub fn push(&mut self, key: K, row: V) -> bool {
        if self.rows.is_empty() {
            self.created_at = Instant::now();
        }
        if let Some(&pos) = self.index.get(&key) {
            self.rows[pos] = row;
            self.coalesced += 1;
            trace!(buffered = self.rows.len(), "Coalesced row into pending batch");
            return true;
        }
        self.index.insert(key, self.rows.len());
        self.rows.push(row);
        false
    }

    /// Whether the buffer reached its row limit.
    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.max_batch_size
    }

    /// Whether the buffer should be written now (full, or older than `linger`).
    pub fn should_flush(&self) -> bool {
        if self.rows.is_empty() {
            return false;
        }
        self.is_full() || self.created_at.elapsed() >= self.linger
    }

    /// Take every pending row in arrival order and reset the buffer.
    pub fn drain(&mut self) -> Vec<V> {
        self.index.clear();
        self.created_at = Instant::now();
        std::mem::take(&mut self.rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Number of rows replaced in place since creation.
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_drain_preserves_order() {
        let mut buf = BatchBuffer::new(10, Duration::from_secs(60));
        buf.push("a", 1);
        buf.push("b", 2);
        buf.push("c", 3);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.drain(), vec![1, 2, 3]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_same_key_replaces_in_place() {
        let mut buf = BatchBuffer::new(10, Duration::from_secs(60));
        assert!(!buf.push("day", 100.0));
        buf.push("other", 1.0);
        assert!(buf.push("day", 150.0));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.coalesced(), 1);
        assert_eq!(buf.drain(), vec![150.0, 1.0]);
    }

    #[test]
    fn test_should_flush_on_size() {
        let mut buf = BatchBuffer::new(2, Duration::from_secs(60));
        buf.push(1, ());
        assert!(!buf.should_flush());
        buf.push(2, ());
        assert!(buf.is_full());
        assert!(buf.should_flush());
    }

    #[test]
    fn test_should_flush_on_age() {
        let mut buf = BatchBuffer::new(100, Duration::ZERO);
        assert!(!buf.should_flush());
        buf.push(1, ());
        assert!(buf.should_flush());
    }

    #[test]
    fn test_drain_resets_index() {
        let mut buf = BatchBuffer::new(10, Duration::from_secs(60));
        buf.push("k", 1);
        buf.drain();
        assert!(!buf.push("k", 2));
        assert_eq!(buf.drain(), vec![2]);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let buf: BatchBuffer<u8, u8> = BatchBuffer::new(0, Duration::from_secs(1));
        assert_eq!(buf.max_batch_size(), 1);
    }
}
