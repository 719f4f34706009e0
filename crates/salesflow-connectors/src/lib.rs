//! salesflow connectors
//!
//! Source and sink connectors that move transactions in and out of the
//! salesflow pipeline.
//!
//! ## Architecture
//!
//! - **Traits**: `SourceConnector` and `SinkConnector<R>` define the connector interface.
//! - **Batching**: `BatchBuffer` coalesces pending rows by key; `RetryPolicy`
//!   retries failed batches with exponential backoff.
//! - **Stores**: `RelationalStore` performs idempotent batch upserts
//!   (`PostgresStore`, `MemoryStore`); `rows` projects transactions and
//!   aggregate updates onto the four target tables.
//! - **Sinks**: `UpsertSinkConnector` for relational tables, `SearchMirrorConnector`
//!   for the Elasticsearch mirror.
//! - **Sources**: `KafkaSourceConnector` with manual offset commits, `MemorySource`.
//!
//! ## Feature Flags
//!
//! - `postgres` - Enables the PostgreSQL store (requires `sqlx` with postgres).
//! - `kafka` - Enables the Kafka consumer (requires `rdkafka` and librdkafka).

pub mod batch;
pub mod config;
pub mod error;
pub mod retry;
pub mod rows;
pub mod sinks;
pub mod sources;
pub mod store;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use batch::BatchBuffer;
pub use config::ConnectorState;
pub use error::{ConnectorError, Result};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use rows::{AggregateTable, UpsertRow};
pub use sinks::{
    DocumentIndex, ElasticsearchConfig, HttpDocumentIndex, IndexDocument, MemoryDocumentIndex,
    SearchMirrorConnector, SinkBatchConfig, UpsertSinkConnector,
};
pub use sources::{KafkaSourceConfig, KafkaSourceConnector, MemorySource};
pub use store::{build_upsert_sql, InjectedFailure, MemoryStore, RelationalStore, SqlValue, TableSpec};
pub use traits::{SinkConnector, SourceConnector, SourceRecord};

#[cfg(feature = "postgres")]
pub use sinks::{PostgresStore, PostgresStoreConfig};
