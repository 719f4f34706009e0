//! Projection of pipeline values into relational rows.
//!
//! Four tables are written:
//!
//! | Table                | Key                           | Row source               |
//! |----------------------|-------------------------------|--------------------------|
//! | `transactions`       | `transaction_id`              | [`Transaction`]          |
//! | `sales_per_category` | `(transaction_date, category)`| `AggregateUpdate<CategoryDay>` |
//! | `sales_per_day`      | `transaction_date`            | `AggregateUpdate<Day>`   |
//! | `sales_per_month`    | `(year, month)`               | `AggregateUpdate<Month>` |
//!
//! Aggregate rows always carry the key's current running total, so an upsert
//! of the same row is a no-op after the first application.

use std::fmt;
use std::hash::Hash;

use salesflow_core::{AggregateUpdate, AggregationKey, CategoryDay, Day, Month, Transaction};

use crate::store::{SqlValue, TableSpec};

pub static TRANSACTIONS: TableSpec = TableSpec {
    name: "transactions",
    columns: &[
        "transaction_id",
        "product_id",
        "product_name",
        "product_category",
        "product_price",
        "product_quantity",
        "product_brand",
        "currency",
        "customer_id",
        "transaction_date",
        "payment_method",
        "payment_status",
        "total_amount",
    ],
    key_columns: &["transaction_id"],
};

pub static SALES_PER_CATEGORY: TableSpec = TableSpec {
    name: "sales_per_category",
    columns: &["transaction_date", "category", "total_sales"],
    key_columns: &["transaction_date", "category"],
};

pub static SALES_PER_DAY: TableSpec = TableSpec {
    name: "sales_per_day",
    columns: &["transaction_date", "total_sales"],
    key_columns: &["transaction_date"],
};

pub static SALES_PER_MONTH: TableSpec = TableSpec {
    name: "sales_per_month",
    columns: &["month", "year", "total_sales"],
    key_columns: &["year", "month"],
};

/// Create-if-absent DDL for every table, run once before steady state.
pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS transactions (\
        transaction_id VARCHAR(255) PRIMARY KEY, \
        product_id VARCHAR(255), \
        product_name VARCHAR(255), \
        product_category VARCHAR(255), \
        product_price DOUBLE PRECISION, \
        product_quantity INTEGER, \
        product_brand VARCHAR(255), \
        currency VARCHAR(255), \
        customer_id VARCHAR(255), \
        transaction_date TIMESTAMP, \
        payment_method VARCHAR(255), \
        payment_status VARCHAR(255), \
        total_amount DOUBLE PRECISION\
    )",
    "CREATE TABLE IF NOT EXISTS sales_per_category (\
        transaction_date DATE, \
        category VARCHAR(255), \
        total_sales DOUBLE PRECISION, \
        PRIMARY KEY (transaction_date, category)\
    )",
    "CREATE TABLE IF NOT EXISTS sales_per_day (\
        transaction_date DATE PRIMARY KEY, \
        total_sales DOUBLE PRECISION\
    )",
    "CREATE TABLE IF NOT EXISTS sales_per_month (\
        month INTEGER, \
        year INTEGER, \
        total_sales DOUBLE PRECISION, \
        PRIMARY KEY (year, month)\
    )",
];

/// A value that can be upserted as one row of a fixed table.
pub trait UpsertRow: Clone + Send + Sync + 'static {
    /// Identity of the row; two rows with equal keys target the same stored row.
    type Key: Hash + Eq + Clone + fmt::Debug + Send + Sync;

    fn table() -> &'static TableSpec;

    fn key(&self) -> Self::Key;

    /// Column values in `table().columns` order.
    fn values(&self) -> Vec<SqlValue>;
}

impl UpsertRow for Transaction {
    type Key = String;

    fn table() -> &'static TableSpec {
        &TRANSACTIONS
    }

    fn key(&self) -> String {
        self.transaction_id.clone()
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(Some(self.transaction_id.clone())),
            SqlValue::Text(self.product_id.clone()),
            SqlValue::Text(self.product_name.clone()),
            SqlValue::Text(self.product_category.clone()),
            SqlValue::Float(self.product_price),
            SqlValue::Int(self.product_quantity),
            SqlValue::Text(self.product_brand.clone()),
            SqlValue::Text(self.currency.clone()),
            SqlValue::Text(self.customer_id.clone()),
            SqlValue::Timestamp(self.transaction_date.naive_utc()),
            SqlValue::Text(self.payment_method.clone()),
            SqlValue::Text(self.payment_status.clone()),
            SqlValue::Float(Some(self.total_amount)),
        ]
    }
}

/// An aggregation key persisted to its own table, with `total_sales` last.
pub trait AggregateTable: AggregationKey {
    fn table() -> &'static TableSpec;

    /// Values of every column except `total_sales`, in column order.
    fn key_values(&self) -> Vec<SqlValue>;
}

impl AggregateTable for CategoryDay {
    fn table() -> &'static TableSpec {
        &SALES_PER_CATEGORY
    }

    fn key_values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Date(self.day),
            SqlValue::Text(Some(self.category.clone())),
        ]
    }
}

impl AggregateTable for Day {
    fn table() -> &'static TableSpec {
        &SALES_PER_DAY
    }

    fn key_values(&self) -> Vec<SqlValue> {
        vec![SqlValue::Date(self.0)]
    }
}

impl AggregateTable for Month {
    fn table() -> &'static TableSpec {
        &SALES_PER_MONTH
    }

    fn key_values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Int(Some(self.month as i32)),
            SqlValue::Int(Some(self.year)),
        ]
    }
}

impl<K: AggregateTable> UpsertRow for AggregateUpdate<K> {
    type Key = K;

    fn table() -> &'static TableSpec {
        K::table()
    }

    fn key(&self) -> K {
        self.key.clone()
    }

    fn values(&self) -> Vec<SqlValue> {
        let mut values = self.key.key_values();
        values.push(SqlValue::Float(Some(self.total)));
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn sample() -> Transaction {
        Transaction {
            transaction_id: "a1".to_string(),
            product_id: Some("p-1".to_string()),
            product_name: Some("laptop".to_string()),
            product_category: Some("Electronics".to_string()),
            product_price: Some(50.0),
            product_quantity: Some(2),
            product_brand: None,
            currency: Some("USD".to_string()),
            customer_id: Some("c-9".to_string()),
            transaction_date: Utc.with_ymd_and_hms(2024, 1, 5, 10, 30, 0).unwrap(),
            payment_method: Some("card".to_string()),
            payment_status: Some("paid".to_string()),
            total_amount: 100.0,
        }
    }

    fn jan(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_every_table_width_matches_values() {
        assert_eq!(sample().values().len(), TRANSACTIONS.columns.len());
        let cat = AggregateUpdate {
            key: CategoryDay::new(jan(5), "Books"),
            total: 1.0,
        };
        assert_eq!(cat.values().len(), SALES_PER_CATEGORY.columns.len());
        let day = AggregateUpdate { key: Day(jan(5)), total: 1.0 };
        assert_eq!(day.values().len(), SALES_PER_DAY.columns.len());
        let month = AggregateUpdate {
            key: Month { year: 2024, month: 1 },
            total: 1.0,
        };
        assert_eq!(month.values().len(), SALES_PER_MONTH.columns.len());
    }

    #[test]
    fn test_transaction_row() {
        let tx = sample();
        let values = tx.values();
        assert_eq!(tx.key(), "a1");
        assert_eq!(values[0].as_str(), Some("a1"));
        assert_eq!(values[5], SqlValue::Int(Some(2)));
        assert_eq!(values[6], SqlValue::Text(None));
        assert_eq!(
            values[9],
            SqlValue::Timestamp(jan(5).and_hms_opt(10, 30, 0).unwrap())
        );
        assert_eq!(values[12].as_f64(), Some(100.0));
    }

    #[test]
    fn test_month_row_column_order() {
        let update = AggregateUpdate {
            key: Month { year: 2024, month: 3 },
            total: 170.0,
        };
        assert_eq!(
            update.values(),
            vec![
                SqlValue::Int(Some(3)),
                SqlValue::Int(Some(2024)),
                SqlValue::Float(Some(170.0)),
            ]
        );
        assert_eq!(<AggregateUpdate<Month> as UpsertRow>::table().name, "sales_per_month");
    }

    #[test]
    fn test_schema_covers_every_table() {
        for table in [&TRANSACTIONS, &SALES_PER_CATEGORY, &SALES_PER_DAY, &SALES_PER_MONTH] {
            assert!(
                SCHEMA
                    .iter()
                    .any(|ddl| ddl.contains(&format!("EXISTS {} (", table.name))),
                "no DDL for {}",
                table.name
            );
        }
    }
}
