//! Search mirror sink connector.
//!
//! Mirrors every validated transaction into a [`DocumentIndex`], document id =
//! transaction id. The mirror is best-effort: a transaction whose document body
//! cannot be serialized is skipped, and a batch that still fails after retries
//! is dropped rather than kept, so an unavailable index cannot make memory grow.

use std::sync::Arc;

use async_trait::async_trait;
use salesflow_core::Transaction;

use crate::batch::BatchBuffer;
use crate::error::Result;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::sinks::elasticsearch::{DocumentIndex, IndexDocument};
use crate::sinks::upsert::SinkBatchConfig;
use crate::traits::SinkConnector;

/// Counters for the mirror branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub indexed: u64,
    pub rejected: u64,
    pub skipped: u64,
    pub dropped: u64,
}

pub struct SearchMirrorConnector {
    name: String,
    index_name: String,
    index: Arc<dyn DocumentIndex>,
    buffer: BatchBuffer<String, IndexDocument>,
    retry: RetryPolicy,
    stats: MirrorStats,
}

impl SearchMirrorConnector {
    pub fn new(
        name: &str,
        index_name: &str,
        index: Arc<dyn DocumentIndex>,
        config: &SinkBatchConfig,
    ) -> Self {
        Self {
            name: name.to_string(),
            index_name: index_name.to_string(),
            index,
            buffer: BatchBuffer::new(config.batch_size, config.batch_interval),
            retry: config.retry_policy(),
            stats: MirrorStats::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn should_flush(&self) -> bool {
        self.buffer.should_flush()
    }

    pub fn stats(&self) -> MirrorStats {
        self.stats
    }

    fn push(&mut self, tx: &Transaction) {
        match tx.to_document() {
            Ok(body) => {
                let id = tx.transaction_id.clone();
                self.buffer.push(id.clone(), IndexDocument { id, body });
            }
            Err(e) => {
                self.stats.skipped += 1;
                tracing::warn!(
                    connector = %self.name,
                    transaction_id = %tx.transaction_id,
                    error = %e,
                    "failed to serialize document, skipping"
                );
            }
        }
    }

    async fn write_batch(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let docs = self.buffer.drain();
        let result = {
            let index = &self.index;
            let index_name = self.index_name.as_str();
            let docs = &docs;
            retry_with_backoff(&self.retry, "bulk_index", || async move {
                index.bulk_index(index_name, docs).await
            })
            .await
        };

        match result {
            Ok(outcome) => {
                self.stats.indexed += outcome.indexed as u64;
                self.stats.rejected += outcome.failed as u64;
                tracing::debug!(
                    connector = %self.name,
                    index = %self.index_name,
                    indexed = outcome.indexed,
                    failed = outcome.failed,
                    "bulk indexed documents"
                );
                Ok(())
            }
            Err(e) => {
                self.stats.dropped += docs.len() as u64;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl SinkConnector<Transaction> for SearchMirrorConnector {
    async fn start(&mut self) -> Result<()> {
        tracing::info!(
            connector = %self.name,
            index = %self.index_name,
            "search mirror connector started"
        );
        Ok(())
    }

    async fn put(&mut self, rows: &[Transaction]) -> Result<()> {
        for tx in rows {
            self.push(tx);
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
            indexed = self.stats.indexed,
            dropped = self.stats.dropped,
            "search mirror connector stopped"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
