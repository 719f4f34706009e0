//! Transaction events as they arrive from the ingestion transport.
//!
//! Payloads are UTF-8 JSON objects. Field names are snake_case
//! (`transaction_id`, `total_amount`, ...); the camelCase spelling produced by
//! the upstream generator (`transactionId`, `totalAmount`, ...) is accepted as
//! an alias.
//!
//! Decoding is deliberately lenient: every field of [`RawTransaction`] is
//! optional so that a record missing a mandatory field surfaces as a
//! [`ValidationError`](crate::error::ValidationError) with the transaction id
//! attached, rather than an opaque JSON error.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// A decoded but not yet validated transaction payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawTransaction {
    #[serde(default, alias = "transactionId")]
    pub transaction_id: Option<String>,
    #[serde(default, alias = "productId")]
    pub product_id: Option<String>,
    #[serde(default, alias = "productName")]
    pub product_name: Option<String>,
    #[serde(default, alias = "productCategory")]
    pub product_category: Option<String>,
    #[serde(default, alias = "productPrice")]
    pub product_price: Option<f64>,
    #[serde(default, alias = "productQuantity")]
    pub product_quantity: Option<i32>,
    #[serde(default, alias = "productBrand")]
    pub product_brand: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, alias = "customerId")]
    pub customer_id: Option<String>,
    /// Kept as raw JSON: producers send strings in several layouts or epoch millis.
    #[serde(default, alias = "transactionDate")]
    pub transaction_date: Option<serde_json::Value>,
    #[serde(default, alias = "paymentMethod")]
    pub payment_method: Option<String>,
    #[serde(default, alias = "paymentStatus")]
    pub payment_status: Option<String>,
    #[serde(default, alias = "totalAmount")]
    pub total_amount: Option<f64>,
}

/// A validated, immutable purchase event.
///
/// Created once by [`Validator::validate`](crate::validate::Validator::validate)
/// and only ever projected into sink writes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub product_category: Option<String>,
    pub product_price: Option<f64>,
    pub product_quantity: Option<i32>,
    pub product_brand: Option<String>,
    pub currency: Option<String>,
    pub customer_id: Option<String>,
    pub transaction_date: DateTime<Utc>,
    pub payment_method: Option<String>,
    pub payment_status: Option<String>,
    pub total_amount: f64,
}

impl Transaction {
    /// The calendar day (UTC) the transaction happened on.
    ///
    /// This is the date bucket every aggregation key is derived from.
    pub fn event_day(&self) -> NaiveDate {
        self.transaction_date.date_naive()
    }

    /// Serialize as the JSON document mirrored into the search index.
    ///
    /// Fails for non-finite amounts, which JSON would otherwise turn into `null`.
    pub fn to_document(&self) -> serde_json::Result<String> {
        let finite = self.total_amount.is_finite()
            && self.product_price.map_or(true, f64::is_finite);
        if !finite {
            return Err(serde::ser::Error::custom(format!(
                "transaction {} has a non-finite amount",
                self.transaction_id
            )));
        }
        serde_json::to_string(self)
    }
}

/// Decode a raw transport payload.
pub fn decode_transaction(payload: &[u8]) -> Result<RawTransaction, DecodeError> {
    let text = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(text)?)
}

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a `transaction_date` value into a UTC timestamp.
///
/// Accepted layouts:
/// - RFC 3339 (`2024-01-05T10:00:00Z`, `2024-01-05T10:00:00+02:00`)
/// - numeric offsets without a colon (`2024-01-05T10:00:00.123456+0000`)
/// - naive date-times, interpreted as UTC (`2024-01-05 10:00:00`)
/// - plain dates, interpreted as UTC midnight (`2024-01-05`)
/// - integer epoch milliseconds (`1704448800000`)
pub fn parse_transaction_date(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => parse_date_str(s.trim()),
        serde_json::Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
