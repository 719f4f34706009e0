//! Upsert Sink Connector
//!
//! Buffers rows of one table and writes them through a [`RelationalStore`] as
//! a single `INSERT ... ON CONFLICT DO UPDATE` per batch. Used for the raw
//! `transactions` table and for each aggregate table.
//!
//! ## Configuration
//!
//! | Key                 | Description                              | Default |
//! |---------------------|------------------------------------------|---------|
//! | `batch.size`        | Distinct keys per batch                  | `1000`  |
//! | `batch.interval.ms` | Max age of a non-empty batch             | `200`   |
//! | `max.retries`       | Retries of a failed batch                | `5`     |
//!
//! A failed batch is put back into the buffer so that a later flush retries
//! the same rows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::batch::BatchBuffer;
use crate::config::parse_opt;
use crate::error::{ConnectorError, Result};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::rows::UpsertRow;
use crate::store::{RelationalStore, SqlValue};
use crate::traits::SinkConnector;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 200;
pub const DEFAULT_MAX_RETRIES: usize = 5;

/// Batching and retry settings shared by every sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkBatchConfig {
    pub batch_size: usize,
    pub batch_interval: Duration,
    pub max_retries: usize,
}

impl Default for SinkBatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_interval: Duration::from_millis(DEFAULT_BATCH_INTERVAL_MS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl SinkBatchConfig {
    /// Parse from a string key-value map, falling back to defaults.
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let batch_size = parse_opt::<usize>(config, "batch.size")?.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(ConnectorError::ConfigError(
                "batch.size must be greater than zero".to_string(),
            ));
        }
        let interval_ms =
            parse_opt::<u64>(config, "batch.interval.ms")?.unwrap_or(DEFAULT_BATCH_INTERVAL_MS);
        let max_retries =
            parse_opt::<usize>(config, "max.retries")?.unwrap_or(DEFAULT_MAX_RETRIES);

        Ok(Self {
            batch_size,
            batch_interval: Duration::from_millis(interval_ms),
            max_retries,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_retries(self.max_retries)
    }
}

/// Sink connector upserting rows of type `R` into `R::table()`.
pub struct UpsertSinkConnector<R: UpsertRow> {
    name: String,
    store: Arc<dyn RelationalStore>,
    buffer: BatchBuffer<R::Key, R>,
    retry: RetryPolicy,
    written: u64,
    batches: u64,
}

impl<R: UpsertRow> UpsertSinkConnector<R> {
    pub fn new(name: &str, store: Arc<dyn RelationalStore>, config: &SinkBatchConfig) -> Self {
        Self {
            name: name.to_string(),
            store,
            buffer: BatchBuffer::new(config.batch_size, config.batch_interval),
            retry: config.retry_policy(),
            written: 0,
            batches: 0,
        }
    }

    /// Replace the retry policy (tests use millisecond backoffs).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Whether the pending batch is full or older than the batch interval.
    pub fn should_flush(&self) -> bool {
        self.buffer.should_flush()
    }

    /// Rows written successfully since start.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Batches written successfully since start.
    pub fn batches(&self) -> u64 {
        self.batches
    }

    async fn write_batch(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let rows = self.buffer.drain();
        let values: Vec<Vec<SqlValue>> = rows.iter().map(|r| r.values()).collect();
        let table = R::table();

        let result = {
            let store = &self.store;
            let values = &values;
            retry_with_backoff(&self.retry, table.name, || async move {
                store.upsert(table, values).await
            })
            .await
        };

        match result {
            Ok(count) => {
                self.written += count;
                self.batches += 1;
                tracing::debug!(
                    connector = %self.name,
                    table = table.name,
                    rows = count,
                    "upserted batch"
                );
                Ok(())
            }
            Err(e) => {
                let failed = rows.len();
                for row in rows {
                    self.buffer.push(row.key(), row);
                }
                tracing::error!(
                    connector = %self.name,
                    table = table.name,
                    rows = failed,
                    error = %e,
                    "batch upsert failed"
                );
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<R: UpsertRow> SinkConnector<R> for UpsertSinkConnector<R> {
    async fn start(&mut self) -> Result<()> {
        tracing::info!(
            connector = %self.name,
            table = R::table().name,
            batch_size = self.buffer.max_batch_size(),
            "upsert sink connector started"
        );
        Ok(())
    }

    async fn put(&mut self, rows: &[R]) -> Result<()> {
        for row in rows {
            self.buffer.push(row.key(), row.clone());
            if self.buffer.is_full() {
                self.write_batch().await?;
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.write_batch().await
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }

    async fn stop(&mut self) -> Result<()> {
        self.flush().await?;
        tracing::info!(
            connector = %self.name,
            written = self.written,
            batches = self.batches,
            "upsert sink connector stopped"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InjectedFailure, MemoryStore};
    use chrono::NaiveDate;
    use salesflow_core::{AggregateUpdate, Day};

    fn config(batch_size: usize) -> SinkBatchConfig {
        SinkBatchConfig {
            batch_size,
            batch_interval: Duration::from_secs(60),
            max_retries: 2,
        }
    }

    fn fast_retry(max_retries: usize) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(2), 2.0)
    }

    fn daily(d: u32, total: f64) -> AggregateUpdate<Day> {
        AggregateUpdate {
            key: Day(NaiveDate::from_ymd_opt(2024, 1, d).unwrap()),
            total,
        }
    }

    fn sink(store: &MemoryStore, batch_size: usize) -> UpsertSinkConnector<AggregateUpdate<Day>> {
        UpsertSinkConnector::new("daily", Arc::new(store.clone()), &config(batch_size))
            .with_retry_policy(fast_retry(2))
    }

    // ---------------------------------------------------------------
    // Config parsing
    // ---------------------------------------------------------------

    #[test]
    fn test_config_defaults() {
        let config = SinkBatchConfig::from_config_map(&HashMap::new()).unwrap();
        assert_eq!(config, SinkBatchConfig::default());
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.batch_interval, Duration::from_millis(200));
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_config_overrides() {
        let mut m = HashMap::new();
        m.insert("batch.size".to_string(), "50".to_string());
        m.insert("batch.interval.ms".to_string(), "10".to_string());
        m.insert("max.retries".to_string(), "0".to_string());
        let config = SinkBatchConfig::from_config_map(&m).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.batch_interval, Duration::from_millis(10));
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let mut m = HashMap::new();
        m.insert("batch.size".to_string(), "abc".to_string());
        assert!(SinkBatchConfig::from_config_map(&m).is_err());
        m.insert("batch.size".to_string(), "0".to_string());
        assert!(SinkBatchConfig::from_config_map(&m).is_err());
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_put_buffers_until_flush() {
        let store = MemoryStore::new();
        let mut sink = sink(&store, 10);
        sink.put(&[daily(5, 100.0), daily(6, 1.0)]).await.unwrap();
        assert_eq!(sink.buffered(), 2);
        assert_eq!(store.row_count("sales_per_day"), 0);

        sink.flush().await.unwrap();
        assert_eq!(sink.buffered(), 0);
        assert_eq!(store.row_count("sales_per_day"), 2);
        assert_eq!(sink.written(), 2);
    }

    #[tokio::test]
    async fn test_put_writes_full_batches() {
        let store = MemoryStore::new();
        let mut sink = sink(&store, 2);
        sink.put(&[daily(1, 1.0), daily(2, 2.0), daily(3, 3.0)]).await.unwrap();
        assert_eq!(store.row_count("sales_per_day"), 2);
        assert_eq!(sink.buffered(), 1);
    }

    #[tokio::test]
    async fn test_latest_total_wins_within_batch() {
        let store = MemoryStore::new();
        let mut sink = sink(&store, 10);
        sink.put(&[daily(5, 100.0), daily(5, 150.0), daily(5, 170.0)])
            .await
            .unwrap();
        sink.flush().await.unwrap();

        let row = store.row("sales_per_day", "2024-01-05").unwrap();
        assert_eq!(row[1].as_f64(), Some(170.0));
        assert_eq!(store.statements(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let store = MemoryStore::new();
        store.fail_next(2, InjectedFailure::Transient);
        let mut sink = sink(&store, 10);
        sink.put(&[daily(5, 1.0)]).await.unwrap();
        sink.flush().await.unwrap();
        assert_eq!(store.attempts(), 3);
        assert_eq!(store.row_count("sales_per_day"), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_keep_batch() {
        let store = MemoryStore::new();
        store.fail_next(3, InjectedFailure::Transient);
        let mut sink = sink(&store, 10);
        sink.put(&[daily(5, 1.0)]).await.unwrap();

        let err = sink.flush().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(sink.buffered(), 1);

        sink.flush().await.unwrap();
        assert_eq!(store.row_count("sales_per_day"), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let store = MemoryStore::new();
        store.fail_next(1, InjectedFailure::Permanent);
        let mut sink = sink(&store, 10);
        sink.put(&[daily(5, 1.0)]).await.unwrap();
        assert!(matches!(
            sink.flush().await,
            Err(ConnectorError::SinkError(_))
        ));
        assert_eq!(store.attempts(), 1);
    }

    #[tokio::test]
    async fn test_stop_flushes() {
        let store = MemoryStore::new();
        let mut sink = sink(&store, 10);
        sink.start().await.unwrap();
        sink.put(&[daily(5, 1.0)]).await.unwrap();
        sink.stop().await.unwrap();
        assert_eq!(store.row_count("sales_per_day"), 1);
    }
}
