//! Sink connector implementations.
//!
//! Relational sinks upsert through a [`RelationalStore`](crate::store::RelationalStore);
//! the search mirror indexes through a [`DocumentIndex`].

pub mod elasticsearch;
pub mod search;
pub mod upsert;

// The Postgres store is only available when the `postgres` feature is enabled.
#[cfg(feature = "postgres")]
pub mod postgres;

pub use elasticsearch::{
    BulkOutcome, DocumentIndex, ElasticsearchConfig, HttpDocumentIndex, IndexDocument,
    MemoryDocumentIndex,
};
pub use search::{MirrorStats, SearchMirrorConnector};
pub use upsert::{SinkBatchConfig, UpsertSinkConnector};

#[cfg(feature = "postgres")]
pub use postgres::{PostgresStore, PostgresStoreConfig};
