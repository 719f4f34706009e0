//! Relational store abstraction.
//!
//! Sinks never talk to a database driver directly: they hand a [`TableSpec`]
//! and a batch of rows to a [`RelationalStore`], which performs an idempotent
//! `INSERT ... ON CONFLICT (<key>) DO UPDATE` for the whole batch.
//!
//! Two stores are provided:
//! - `PostgresStore` (feature `postgres`), backed by a sqlx pool.
//! - [`MemoryStore`], same upsert semantics in process, used by tests and
//!   dry runs. It can be told to fail upcoming writes.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{ConnectorError, Result};

/// Static description of a target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    /// Every column written, in bind order.
    pub columns: &'static [&'static str],
    /// The conflict target (primary key columns).
    pub key_columns: &'static [&'static str],
}

impl TableSpec {
    /// Columns overwritten on conflict.
    pub fn value_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns
            .iter()
            .copied()
            .filter(|c| !self.key_columns.contains(c))
    }

    /// Positions of the key columns within a row.
    pub fn key_positions(&self) -> Vec<usize> {
        self.key_columns
            .iter()
            .filter_map(|k| self.columns.iter().position(|c| c == k))
            .collect()
    }
}

/// A single bound column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Float(Option<f64>),
    Int(Option<i32>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    pub fn text(s: impl Into<String>) -> Self {
        SqlValue::Text(Some(s.into()))
    }

    pub fn is_null(&self) -> bool {
        matches!(
            self,
            SqlValue::Text(None) | SqlValue::Float(None) | SqlValue::Int(None)
        )
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Float(v) => *v,
            SqlValue::Int(v) => v.map(f64::from),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => v.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Text(Some(v)) => write!(f, "{}", v),
            SqlValue::Float(Some(v)) => write!(f, "{}", v),
            SqlValue::Int(Some(v)) => write!(f, "{}", v),
            SqlValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            SqlValue::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            _ => write!(f, "NULL"),
        }
    }
}

/// Trait implemented by every relational backend.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Upsert `rows` into `table` atomically. Returns the number of rows written.
    ///
    /// Every row must have exactly `table.columns.len()` values and no two rows
    /// may share a key.
    async fn upsert(&self, table: &TableSpec, rows: &[Vec<SqlValue>]) -> Result<u64>;
}

/// Build a multi-row upsert statement with `$n` placeholders.
///
/// ```text
/// INSERT INTO sales_per_day (transaction_date, total_sales) VALUES ($1, $2), ($3, $4)
///   ON CONFLICT (transaction_date) DO UPDATE SET total_sales = EXCLUDED.total_sales
/// ```
pub fn build_upsert_sql(table: &TableSpec, num_rows: usize) -> String {
    let width = table.columns.len();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ",
        table.name,
        table.columns.join(", ")
    );

    for row in 0..num_rows {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for col in 0..width {
            if col > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&format!("${}", row * width + col + 1));
        }
        sql.push(')');
    }

    sql.push_str(&format!(
        " ON CONFLICT ({}) DO ",
        table.key_columns.join(", ")
    ));

    let updates: Vec<String> = table
        .value_columns()
        .map(|c| format!("{} = EXCLUDED.{}", c, c))
        .collect();
    if updates.is_empty() {
        sql.push_str("NOTHING");
    } else {
        sql.push_str("UPDATE SET ");
        sql.push_str(&updates.join(", "));
    }

    sql
}

/// Check that every row has the table's width and the batch has no duplicate keys.
pub(crate) fn check_batch(table: &TableSpec, rows: &[Vec<SqlValue>]) -> Result<()> {
    let positions = table.key_positions();
    let mut seen = HashSet::with_capacity(rows.len());
    for row in rows {
        if row.len() != table.columns.len() {
            return Err(ConnectorError::SinkError(format!(
                "{}: row has {} values, expected {}",
                table.name,
                row.len(),
                table.columns.len()
            )));
        }
        let key = render_key(&positions, row);
        if !seen.insert(key.clone()) {
            return Err(ConnectorError::SinkError(format!(
                "{}: ON CONFLICT DO UPDATE cannot affect row '{}' a second time",
                table.name, key
            )));
        }
    }
    Ok(())
}

fn render_key(positions: &[usize], row: &[SqlValue]) -> String {
    positions
        .iter()
        .map(|&p| row[p].to_string())
        .collect::<Vec<_>>()
        .join("|")
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Kind of failure injected into a [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// Reported as a connection error (retryable).
    Transient,
    /// Reported as a sink rejection (not retryable).
    Permanent,
}

#[derive(Debug, Default)]
struct MemoryInner {
    tables: HashMap<&'static str, BTreeMap<String, Vec<SqlValue>>>,
    failures: VecDeque<InjectedFailure>,
    attempts: u64,
    statements: u64,
}

/// In-process [`RelationalStore`] with upsert semantics.
///
/// Cloning shares the underlying tables, so a test can keep a handle and
/// inspect what the pipeline wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` upsert calls with `kind`.
    pub fn fail_next(&self, count: usize, kind: InjectedFailure) {
        let mut inner = self.lock();
        inner.failures.extend(std::iter::repeat(kind).take(count));
    }

    /// All rows of `table`, ordered by rendered key.
    pub fn rows(&self, table: &str) -> Vec<Vec<SqlValue>> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The row of `table` whose key renders as `key` (values joined by `|`).
    pub fn row(&self, table: &str, key: &str) -> Option<Vec<SqlValue>> {
        self.lock().tables.get(table)?.get(key).cloned()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, |t| t.len())
    }

    /// Number of upsert calls, including failed ones.
    pub fn attempts(&self) -> u64 {
        self.lock().attempts
    }

    /// Number of upsert calls that were applied.
    pub fn statements(&self) -> u64 {
        self.lock().statements
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // A poisoned lock only means a test thread panicked mid-write.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn upsert(&self, table: &TableSpec, rows: &[Vec<SqlValue>]) -> Result<u64> {
        let mut inner = self.lock();
        inner.attempts += 1;

        match inner.failures.pop_front() {
            Some(InjectedFailure::Transient) => {
                return Err(ConnectorError::ConnectionError(format!(
                    "{}: injected transient failure",
                    table.name
                )))
            }
            Some(InjectedFailure::Permanent) => {
                return Err(ConnectorError::SinkError(format!(
                    "{}: injected permanent failure",
                    table.name
                )))
            }
            None => {}
        }

        check_batch(table, rows)?;

        let positions = table.key_positions();
        let stored = inner.tables.entry(table.name).or_default();
        for row in rows {
            stored.insert(render_key(&positions, row), row.clone());
        }
        inner.statements += 1;
        Ok(rows.len() as u64)
    }
}
