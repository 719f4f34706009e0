//! Source connector implementations.

pub mod kafka;
pub mod memory;

pub use kafka::{KafkaSourceConfig, KafkaSourceConnector};
pub use memory::MemorySource;
