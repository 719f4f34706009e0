//! salesflow pipeline
//!
//! Wires a transaction source through validation and the three keyed
//! roll-ups into the relational tables and the search mirror.
//!
//! - [`Pipeline`]: fan-out, checkpoints (flush, then commit) and shutdown.
//! - [`SinkWorker`]: one background task per sink branch with interval
//!   flushes and [`Criticality`]-aware error handling.
//! - [`PipelineConfig`]: batching, retry, checkpoint and retention settings.
//! - [`PipelineStats`]: counters shared with the binary.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod stats;
pub mod worker;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::Pipeline;
pub use stats::{PipelineStats, StatsSnapshot};
pub use worker::{Criticality, SinkWorker};
