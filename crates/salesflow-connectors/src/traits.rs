//! Connector traits for the salesflow pipeline.
//!
//! Defines the `SourceConnector` and `SinkConnector` traits that every
//! connector implementation satisfies, along with the record type the
//! ingestion side hands to the pipeline.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// A raw record consumed from the ingestion transport.
///
/// The payload is still encoded; decoding happens in the pipeline so that a
/// malformed payload can be dropped without failing the source.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    /// Topic the record was consumed from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: u32,
    /// Offset within the partition.
    pub offset: u64,
    /// Timestamp in milliseconds since epoch.
    pub timestamp: u64,
    /// Optional record key.
    pub key: Option<Bytes>,
    /// Record value (payload).
    pub value: Bytes,
}

/// Trait that all source connectors must implement.
///
/// A source connector reads encoded transaction payloads from an external
/// transport. Records handed out by [`poll`](Self::poll) are not considered
/// consumed until [`commit`](Self::commit) is called, so a restart re-reads
/// everything after the last commit.
#[async_trait]
pub trait SourceConnector: Send {
    /// Initialize the connector and subscribe.
    async fn start(&mut self) -> Result<()>;

    /// Poll for new records.
    ///
    /// Returns an empty vec when no new records are available.
    async fn poll(&mut self) -> Result<Vec<SourceRecord>>;

    /// Acknowledge every record returned by earlier polls.
    async fn commit(&mut self) -> Result<()>;

    /// Gracefully shut down the connector.
    async fn stop(&mut self) -> Result<()>;

    /// Return the unique name of this connector instance.
    fn name(&self) -> &str;
}

/// Trait that all sink connectors must implement.
///
/// A sink connector persists rows of type `R` to an external system. Writes
/// must be idempotent: a batch may be retried or replayed as a whole.
#[async_trait]
pub trait SinkConnector<R: Send + Sync>: Send {
    /// Initialize the connector and establish connections.
    async fn start(&mut self) -> Result<()>;

    /// Accept rows for writing.
    ///
    /// Implementations buffer rows internally and may write a batch as soon as
    /// the buffer is full; anything left over is written by [`flush`](Self::flush).
    async fn put(&mut self, rows: &[R]) -> Result<()>;

    /// Write every buffered row to the external system.
    async fn flush(&mut self) -> Result<()>;

    /// Number of rows waiting for the next flush.
    fn buffered(&self) -> usize;

    /// Gracefully shut down the connector, flushing remaining data.
    async fn stop(&mut self) -> Result<()>;

    /// Return the unique name of this connector instance.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // SourceRecord
    // ---------------------------------------------------------------

    #[test]
    fn test_source_record_construction() {
        let rec = SourceRecord {
            topic: "financial_transactions".to_string(),
            partition: 0,
            offset: 42,
            timestamp: 1_700_000_000_000,
            key: Some(Bytes::from("a1")),
            value: Bytes::from(r#"{"transaction_id":"a1"}"#),
        };
        assert_eq!(rec.topic, "financial_transactions");
        assert_eq!(rec.offset, 42);
        assert_eq!(rec.key, Some(Bytes::from("a1")));
    }

    // ---------------------------------------------------------------
    // Trait object safety (compile-time verification)
    // ---------------------------------------------------------------

    struct MockSink;

    #[async_trait]
    impl SinkConnector<String> for MockSink {
        async fn start(&mut self) -> Result<()> {
            Ok(())
        }
        async fn put(&mut self, _rows: &[String]) -> Result<()> {
            Ok(())
        }
        async fn flush(&mut self) -> Result<()> {
            Ok(())
        }
        fn buffered(&self) -> usize {
            0
        }
        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            "mock-sink"
        }
    }

    struct MockSource;

    #[async_trait]
    impl SourceConnector for MockSource {
        async fn start(&mut self) -> Result<()> {
            Ok(())
        }
        async fn poll(&mut self) -> Result<Vec<SourceRecord>> {
            Ok(vec![])
        }
        async fn commit(&mut self) -> Result<()> {
            Ok(())
        }
        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            "mock-source"
        }
    }

    #[test]
    fn test_sink_connector_object_safety() {
        let sink = MockSink;
        let _: &dyn SinkConnector<String> = &sink;
    }

    #[test]
    fn test_source_connector_object_safety() {
        let source = MockSource;
        let _: &dyn SourceConnector = &source;
    }

    #[tokio::test]
    async fn test_mock_source_lifecycle() {
        let mut source = MockSource;
        source.start().await.unwrap();
        assert!(source.poll().await.unwrap().is_empty());
        source.commit().await.unwrap();
        source.stop().await.unwrap();
        assert_eq!(source.name(), "mock-source");
    }
}
