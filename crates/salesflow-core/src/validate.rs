//! Transaction validator / normalizer.
//!
//! Turns a [`RawTransaction`] into a [`Transaction`] or rejects it. Only the
//! three fields the aggregation engine depends on are mandatory:
//! `transaction_id`, `total_amount` and `transaction_date`. Everything else is
//! passed through unmodified, including negative amounts.
//!
//! Two sanity bounds protect the running totals. A `transaction_date` further
//! ahead of the wall clock than the allowed skew is rejected, since it would
//! drag every aggregator's retention watermark into the future. The clock only
//! bounds the date; keys are always derived from the event day. An amount whose
//! magnitude exceeds [`MAX_ABS_AMOUNT`] is rejected so that sums stay finite.

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::ValidationError;
use crate::transaction::{parse_transaction_date, RawTransaction, Transaction};

/// Default tolerance for event times ahead of the local clock.
pub const DEFAULT_MAX_FUTURE_SKEW_HOURS: i64 = 24;

/// Largest accepted `|total_amount|`.
pub const MAX_ABS_AMOUNT: f64 = 1e12;

/// Validator for decoded transactions.
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    max_future_skew: Option<TimeDelta>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            max_future_skew: Some(TimeDelta::hours(DEFAULT_MAX_FUTURE_SKEW_HOURS)),
        }
    }

    /// Set how far past the wall clock a `transaction_date` may lie.
    /// `None` accepts any date.
    pub fn with_max_future_skew(mut self, skew: Option<TimeDelta>) -> Self {
        self.max_future_skew = skew;
        self
    }

    pub fn max_future_skew(&self) -> Option<TimeDelta> {
        self.max_future_skew
    }

    /// Validate and normalize a decoded transaction.
    ///
    /// The transaction id is trimmed; an id that is blank after trimming counts
    /// as missing. `total_amount` must be finite so that no running total can be
    /// poisoned by NaN.
    pub fn validate(&self, raw: RawTransaction) -> Result<Transaction, ValidationError> {
        self.validate_at(raw, Utc::now())
    }

    /// [`validate`](Self::validate) against an explicit wall-clock time.
    pub fn validate_at(
        &self,
        raw: RawTransaction,
        now: DateTime<Utc>,
    ) -> Result<Transaction, ValidationError> {
        let transaction_id = raw
            .transaction_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or(ValidationError::MissingTransactionId)?;

        let total_amount = raw
            .total_amount
            .ok_or_else(|| ValidationError::MissingTotalAmount(transaction_id.clone()))?;
        if !total_amount.is_finite() {
            return Err(ValidationError::NonFiniteAmount {
                id: transaction_id,
                value: total_amount,
            });
        }
        if total_amount.abs() > MAX_ABS_AMOUNT {
            return Err(ValidationError::AmountOutOfRange {
                id: transaction_id,
                value: total_amount,
            });
        }

        let date_value = match raw.transaction_date {
            None | Some(serde_json::Value::Null) => {
                return Err(ValidationError::MissingTransactionDate(transaction_id))
            }
            Some(value) => value,
        };
        let transaction_date = parse_transaction_date(&date_value).ok_or_else(|| {
            ValidationError::InvalidTransactionDate {
                id: transaction_id.clone(),
                value: date_value.to_string(),
            }
        })?;

        if let Some(skew) = self.max_future_skew {
            let limit = now.checked_add_signed(skew).unwrap_or(DateTime::<Utc>::MAX_UTC);
            if transaction_date > limit {
                return Err(ValidationError::FutureTransactionDate {
                    id: transaction_id,
                    value: transaction_date.to_rfc3339(),
                });
            }
        }

        if total_amount < 0.0 {
            tracing::debug!(
                transaction_id = %transaction_id,
                total_amount,
                "transaction carries a negative total_amount"
            );
        }

        Ok(Transaction {
            transaction_id,
            product_id: raw.product_id,
            product_name: raw.product_name,
            product_category: raw.product_category,
            product_price: raw.product_price,
            product_quantity: raw.product_quantity,
            product_brand: raw.product_brand,
            currency: raw.currency,
            customer_id: raw.customer_id,
            transaction_date,
            payment_method: raw.payment_method,
            payment_status: raw.payment_status,
            total_amount,
        })
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
