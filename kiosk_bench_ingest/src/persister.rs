//! Bulk persistence of batches as a single multi-row insert.
//!
//! Each flush becomes exactly one parameterised `INSERT` covering every row of the batch, so the
//! store's statement atomicity makes a flush all-or-nothing. Rows carry no idempotency key: a
//! batch that is re-delivered after a crash (offsets are committed independently of flushes) is
//! inserted again.

use std::fmt::Write;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use observability_deps::tracing::debug;
use thiserror::Error;

use crate::record::RowRecord;

pub mod mock;
pub mod postgres;

/// Default target table
pub const DEFAULT_TABLE_NAME: &str = "kiosk_events";

/// Columns written for every row, in bind order
pub const COLUMNS: [&str; 10] = [
    "mall_id",
    "kiosk_id",
    "event_type",
    "event_ts",
    "amount_cents",
    "total_items",
    "payment_method",
    "status",
    "created_at",
    "updated_at",
];

/// Postgres accepts at most this many bind parameters in one statement
pub const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// The largest batch that still fits into one statement
pub const MAX_ROWS_PER_STATEMENT: usize = MAX_BIND_PARAMS / COLUMNS.len();

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("statement rejected: {0}")]
    Rejected(String),

    #[error("sink is closed")]
    Closed,
}

#[derive(Debug, Error)]
#[error("failed to insert batch of {rows} rows into {table}: {source}")]
pub struct PersistError {
    pub table: String,
    pub rows: usize,
    pub source: SinkError,
}

/// A single bind parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Int(Option<i32>),
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// A parameterised statement with its positional (`$1..$n`) parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl InsertStatement {
    /// Build one multi-row insert for `rows`, in order; `None` if there is nothing to insert
    pub fn for_rows(table: &str, rows: &[RowRecord]) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }

        let width = COLUMNS.len();
        let mut sql = format!("INSERT INTO {table} ({}) VALUES ", COLUMNS.join(", "));
        let mut params = Vec::with_capacity(rows.len() * width);

        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for col in 0..width {
                if col > 0 {
                    sql.push_str(", ");
                }
                // writing into a String cannot fail
                let _ = write!(sql, "${}", i * width + col + 1);
            }
            sql.push(')');

            params.extend([
                SqlValue::Int(row.mall_id),
                SqlValue::Int(row.kiosk_id),
                SqlValue::Text(row.event_type.clone()),
                SqlValue::Timestamp(row.event_ts),
                SqlValue::Int(row.amount_cents),
                SqlValue::Int(row.total_items),
                SqlValue::Int(row.payment_method),
                SqlValue::Int(row.status),
                SqlValue::Timestamp(row.created_at),
                SqlValue::Timestamp(row.updated_at),
            ]);
        }

        Some(Self { sql, params })
    }
}

/// Something that can execute a statement against the relational store
#[async_trait]
pub trait StatementSink: std::fmt::Debug + Send + 'static {
    /// Execute `statement`, returning the number of affected rows
    async fn execute(&mut self, statement: &InsertStatement) -> Result<u64, SinkError>;

    /// Release the underlying connection
    async fn close(&mut self) -> Result<(), SinkError>;
}

/// Writes batches through a [`StatementSink`], one statement per batch
#[derive(Debug)]
pub struct BulkPersister<S> {
    table: String,
    sink: S,
}

impl<S: StatementSink> BulkPersister<S> {
    pub fn new(table: impl Into<String>, sink: S) -> Self {
        Self {
            table: table.into(),
            sink,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Insert `batch` with a single statement
    ///
    /// A failure rejects the whole batch and is returned as is; there is no retry here.
    pub async fn persist(&mut self, batch: &[RowRecord]) -> Result<u64, PersistError> {
        let Some(statement) = InsertStatement::for_rows(&self.table, batch) else {
            return Ok(0);
        };

        let inserted = self
            .sink
            .execute(&statement)
            .await
            .map_err(|source| PersistError {
                table: self.table.clone(),
                rows: batch.len(),
                source,
            })?;
        debug!(table = %self.table, rows = batch.len(), inserted, "inserted batch");
        Ok(inserted)
    }

    pub async fn close(&mut self) -> Result<(), SinkError> {
        self.sink.close().await
    }
}
