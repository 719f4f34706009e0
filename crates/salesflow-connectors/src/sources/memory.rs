//! In-memory source connector.
//!
//! Behaves like a single-partition topic with a committed offset: records are
//! appended to a log, polls advance a read position, and `commit` moves the
//! committed offset up to the read position. [`MemorySource::restart`]
//! rewinds the read position to the committed offset, which is what a crashed
//! consumer sees when it rejoins its group.
//!
//! Cloning shares the log, so tests keep one handle to produce records and
//! observe commits while the pipeline owns the other.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::ConnectorState;
use crate::error::{ConnectorError, Result};
use crate::traits::{SourceConnector, SourceRecord};

#[derive(Debug)]
struct Log {
    records: Vec<SourceRecord>,
    position: usize,
    committed: usize,
    commits: u64,
}

#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    topic: String,
    max_poll_records: usize,
    state: ConnectorState,
    log: Arc<Mutex<Log>>,
}

impl MemorySource {
    pub fn new(name: &str, topic: &str) -> Self {
        Self {
            name: name.to_string(),
            topic: topic.to_string(),
            max_poll_records: 500,
            state: ConnectorState::Stopped,
            log: Arc::new(Mutex::new(Log {
                records: Vec::new(),
                position: 0,
                committed: 0,
                commits: 0,
            })),
        }
    }

    pub fn with_max_poll_records(mut self, max: usize) -> Self {
        self.max_poll_records = max.max(1);
        self
    }

    /// Append a payload to the log and return its offset.
    pub fn send(&self, value: impl Into<Bytes>) -> u64 {
        self.append(None, value.into())
    }

    /// Append a keyed payload to the log and return its offset.
    pub fn send_keyed(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> u64 {
        self.append(Some(key.into()), value.into())
    }

    fn append(&self, key: Option<Bytes>, value: Bytes) -> u64 {
        let mut log = self.lock();
        let offset = log.records.len() as u64;
        log.records.push(SourceRecord {
            topic: self.topic.clone(),
            partition: 0,
            offset,
            timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
            key,
            value,
        });
        offset
    }

    /// Offset of the next record a restarted consumer would read.
    pub fn committed_offset(&self) -> u64 {
        self.lock().committed as u64
    }

    /// Records appended but not yet polled.
    pub fn lag(&self) -> usize {
        let log = self.lock();
        log.records.len() - log.position
    }

    /// Number of commits that moved the committed offset.
    pub fn commits(&self) -> u64 {
        self.lock().commits
    }

    /// Rewind the read position to the committed offset.
    pub fn restart(&self) {
        let mut log = self.lock();
        log.position = log.committed;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl SourceConnector for MemorySource {
    async fn start(&mut self) -> Result<()> {
        if self.state == ConnectorState::Running {
            return Err(ConnectorError::SourceError(
                "connector is already running".to_string(),
            ));
        }
        self.state = ConnectorState::Running;
        tracing::info!(connector = %self.name, topic = %self.topic, "memory source started");
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<SourceRecord>> {
        if self.state != ConnectorState::Running {
            return Err(ConnectorError::SourceError(
                "connector is not running".to_string(),
            ));
        }
        let mut log = self.lock();
        let end = (log.position + self.max_poll_records).min(log.records.len());
        let records = log.records[log.position..end].to_vec();
        log.position = end;
        Ok(records)
    }

    async fn commit(&mut self) -> Result<()> {
        let mut log = self.lock();
        if log.committed != log.position {
            log.committed = log.position;
            log.commits += 1;
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.state = ConnectorState::Stopped;
        tracing::info!(connector = %self.name, "memory source stopped");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_respects_batch_limit() {
        let mut source = MemorySource::new("mem", "financial_transactions").with_max_poll_records(2);
        for i in 0..3 {
            source.send(format!("{{\"n\":{}}}", i));
        }
        source.start().await.unwrap();

        let first = source.poll().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].offset, 1);
        assert_eq!(first[0].topic, "financial_transactions");
        assert_eq!(source.poll().await.unwrap().len(), 1);
        assert!(source.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restart_replays_uncommitted() {
        let mut source = MemorySource::new("mem", "t");
        let handle = source.clone();
        source.start().await.unwrap();

        handle.send("a");
        source.poll().await.unwrap();
        source.commit().await.unwrap();
        handle.send("b");
        source.poll().await.unwrap();

        assert_eq!(handle.committed_offset(), 1);
        handle.restart();
        let replayed = source.poll().await.unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].value, Bytes::from("b"));
    }

    #[tokio::test]
    async fn test_commit_without_progress_is_noop() {
        let mut source = MemorySource::new("mem", "t");
        source.start().await.unwrap();
        source.commit().await.unwrap();
        assert_eq!(source.commits(), 0);
    }

    #[tokio::test]
    async fn test_poll_before_start_fails() {
        let mut source = MemorySource::new("mem", "t");
        assert!(source.poll().await.is_err());
    }

    #[test]
    fn test_send_keyed() {
        let source = MemorySource::new("mem", "t");
        assert_eq!(source.send_keyed("a1", "{}"), 0);
        assert_eq!(source.send("{}"), 1);
        assert_eq!(source.lag(), 2);
    }
}
