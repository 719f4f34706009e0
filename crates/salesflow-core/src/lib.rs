//! salesflow core
//!
//! The pure half of the salesflow pipeline: no I/O, no async.
//!
//! - **Transaction**: [`RawTransaction`] decoded from the transport payload,
//!   [`Transaction`] once validated.
//! - **Validator**: [`Validator`] rejects records missing an id, an amount or a date,
//!   and records whose amount or date is beyond a sanity bound.
//! - **Keys**: [`CategoryDay`], [`Day`] and [`Month`], all derived from the
//!   transaction's own event day.
//! - **Aggregation**: [`KeyedAggregator`] keeps a running total per key on top of
//!   an arena-backed [`KeyedStateStore`], with an optional [`ReplayWindow`] and
//!   [`RetentionPolicy`].

pub mod aggregator;
pub mod dedup;
pub mod error;
pub mod keys;
pub mod state;
pub mod transaction;
pub mod validate;

pub use aggregator::{AggregateUpdate, AggregatorStats, FoldOutcome, KeyedAggregator, RetentionPolicy};
pub use dedup::{ReplayStats, ReplayWindow, Sighting};
pub use error::{CoreError, DecodeError, Result, ValidationError};
pub use keys::{AggregationKey, CategoryDay, Day, Month, UNCATEGORIZED};
pub use state::{sum, KeyedStateStore, MergeFn};
pub use transaction::{decode_transaction, parse_transaction_date, RawTransaction, Transaction};
pub use validate::{Validator, DEFAULT_MAX_FUTURE_SKEW_HOURS, MAX_ABS_AMOUNT};

/// Decode and validate one transport payload.
pub fn ingest(payload: &[u8]) -> Result<Transaction> {
    let raw = decode_transaction(payload)?;
    Ok(Validator::new().validate(raw)?)
}
