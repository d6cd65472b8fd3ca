//! A [`StatementSink`] over a single Postgres connection.

use async_trait::async_trait;
use observability_deps::tracing::{info, warn};
use sqlx::{Connection, PgConnection};

use super::{InsertStatement, SinkError, SqlValue, StatementSink};

/// Owns one connection for the lifetime of the ingest loop
#[derive(Debug)]
pub struct PgSink {
    conn: Option<PgConnection>,
}

impl PgSink {
    /// Open a connection to `dsn`
    pub async fn connect(dsn: &str) -> Result<Self, SinkError> {
        let conn = PgConnection::connect(dsn).await?;
        info!("connected to postgres");
        Ok(Self { conn: Some(conn) })
    }

    /// Issue a trivial query to make sure the connection is usable
    pub async fn ping(&mut self) -> Result<(), SinkError> {
        let conn = self.conn.as_mut().ok_or(SinkError::Closed)?;
        conn.ping().await?;
        Ok(())
    }
}

#[async_trait]
impl StatementSink for PgSink {
    async fn execute(&mut self, statement: &InsertStatement) -> Result<u64, SinkError> {
        let conn = self.conn.as_mut().ok_or(SinkError::Closed)?;

        let mut query = sqlx::query(&statement.sql);
        for param in &statement.params {
            query = match param {
                SqlValue::Int(v) => query.bind(*v),
                SqlValue::Text(v) => query.bind(v.as_str()),
                SqlValue::Timestamp(v) => query.bind(*v),
            };
        }

        let result = query.execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        match self.conn.take() {
            Some(conn) => {
                conn.close().await?;
                info!("closed postgres connection");
            }
            None => warn!("postgres connection already closed"),
        }
        Ok(())
    }
}
