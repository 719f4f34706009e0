//! Aggregation keys.
//!
//! Every key is derived from the transaction's own event day (UTC), never from
//! the wall clock, so a replayed or late event lands in its historical bucket.

use std::fmt;
use std::hash::Hash;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::transaction::Transaction;

/// Category bucket used when a transaction carries no product category.
pub const UNCATEGORIZED: &str = "uncategorized";

/// A key a [`KeyedAggregator`](crate::aggregator::KeyedAggregator) groups by.
pub trait AggregationKey: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Name of the roll-up, used in logs and stats.
    const NAME: &'static str;

    /// Derive the key from a validated transaction.
    fn extract(tx: &Transaction) -> Self;

    /// Last calendar day covered by this key. Retention compares against it.
    fn last_day(&self) -> NaiveDate;
}

/// Sales per (day, product category).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryDay {
    pub day: NaiveDate,
    pub category: String,
}

impl CategoryDay {
    pub fn new(day: NaiveDate, category: impl Into<String>) -> Self {
        Self {
            day,
            category: category.into(),
        }
    }
}

impl AggregationKey for CategoryDay {
    const NAME: &'static str = "sales_per_category";

    fn extract(tx: &Transaction) -> Self {
        let category = tx
            .product_category
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(UNCATEGORIZED);
        Self::new(tx.event_day(), category)
    }

    fn last_day(&self) -> NaiveDate {
        self.day
    }
}

impl fmt::Display for CategoryDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.day, self.category)
    }
}

/// Sales per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Day(pub NaiveDate);

impl AggregationKey for Day {
    const NAME: &'static str = "sales_per_day";

    fn extract(tx: &Transaction) -> Self {
        Day(tx.event_day())
    }

    fn last_day(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sales per calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Month {
    pub year: i32,
    pub month: u32,
}

impl Month {
    pub fn of(day: NaiveDate) -> Self {
        Self {
            year: day.year(),
            month: day.month(),
        }
    }
}

impl AggregationKey for Month {
    const NAME: &'static str = "sales_per_month";

    fn extract(tx: &Transaction) -> Self {
        Month::of(tx.event_day())
    }

    fn last_day(&self) -> NaiveDate {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|first_of_next| first_of_next.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}
