//! Error types for decoding and validating transaction events.
//!
//! ## Error Categories
//!
//! - [`DecodeError`]: the payload could not be turned into a [`RawTransaction`]
//!   (not UTF-8, not JSON, wrong field types).
//! - [`ValidationError`]: the payload decoded, but a mandatory field is missing or
//!   unusable.
//!
//! Both are *malformed input*: the record is dropped, reported, and the stream
//! keeps flowing. [`CoreError`] unifies them for callers that do not care which
//! stage rejected the record.
//!
//! [`RawTransaction`]: crate::transaction::RawTransaction

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// The payload could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("payload is not a transaction object: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// The decoded record is missing something the aggregation engine needs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing transaction_id")]
    MissingTransactionId,

    #[error("missing total_amount for transaction {0}")]
    MissingTotalAmount(String),

    #[error("total_amount for transaction {id} is not finite: {value}")]
    NonFiniteAmount { id: String, value: f64 },

    #[error("total_amount for transaction {id} is out of range: {value}")]
    AmountOutOfRange { id: String, value: f64 },

    #[error("missing transaction_date for transaction {0}")]
    MissingTransactionDate(String),

    #[error("unparseable transaction_date for transaction {id}: {value}")]
    InvalidTransactionDate { id: String, value: String },

    #[error("transaction_date for transaction {id} is too far in the future: {value}")]
    FutureTransactionDate { id: String, value: String },
}

/// Any reason a payload was rejected before reaching aggregation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Short machine-readable reason, used as a structured log field.
    pub fn reason(&self) -> &'static str {
        match self {
            CoreError::Decode(DecodeError::InvalidUtf8(_)) => "invalid_utf8",
            CoreError::Decode(DecodeError::InvalidJson(_)) => "invalid_json",
            CoreError::Validation(ValidationError::MissingTransactionId) => {
                "missing_transaction_id"
            }
            CoreError::Validation(ValidationError::MissingTotalAmount(_)) => {
                "missing_total_amount"
            }
            CoreError::Validation(ValidationError::NonFiniteAmount { .. }) => {
                "non_finite_total_amount"
            }
            CoreError::Validation(ValidationError::AmountOutOfRange { .. }) => {
                "total_amount_out_of_range"
            }
            CoreError::Validation(ValidationError::MissingTransactionDate(_)) => {
                "missing_transaction_date"
            }
            CoreError::Validation(ValidationError::InvalidTransactionDate { .. }) => {
                "invalid_transaction_date"
            }
            CoreError::Validation(ValidationError::FutureTransactionDate { .. }) => {
                "future_transaction_date"
            }
        }
    }
}
