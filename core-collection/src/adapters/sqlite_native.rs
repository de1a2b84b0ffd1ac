//! [`DatabaseAdapter`] over a `sqlx` SQLite pool.
//!
//! Statements arrive rendered with `?` placeholders and are bound here. The
//! pool comes from [`crate::db::create_pool`] already migrated.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Pool, Row, Sqlite};
use std::collections::HashMap;
use store_traits::{DatabaseAdapter, QueryRow, QueryValue, Result, StoreError};
use tracing::{debug, trace, warn};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Clones share the pool.
#[derive(Clone)]
pub struct SqliteAdapter {
    pool: Pool<Sqlite>,
}

impl SqliteAdapter {
    /// Wrap an already configured and migrated pool.
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    fn column_value(row: &SqliteRow, ordinal: usize) -> QueryValue {
        if let Ok(v) = row.try_get::<Option<i64>, _>(ordinal) {
            v.map(QueryValue::Integer).unwrap_or(QueryValue::Null)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(ordinal) {
            v.map(QueryValue::Real).unwrap_or(QueryValue::Null)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(ordinal) {
            v.map(QueryValue::Text).unwrap_or(QueryValue::Null)
        } else if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(ordinal) {
            v.map(QueryValue::Blob).unwrap_or(QueryValue::Null)
        } else {
            QueryValue::Null
        }
    }

    fn named_row(row: &SqliteRow) -> QueryRow {
        row.columns()
            .iter()
            .map(|column| {
                (
                    column.name().to_string(),
                    Self::column_value(row, column.ordinal()),
                )
            })
            .collect::<HashMap<_, _>>()
    }

    fn prepare<'q>(sql: &'q str, params: &'q [QueryValue]) -> SqliteQuery<'q> {
        params
            .iter()
            .fold(sqlx::query(sql), |statement, param| match param {
                QueryValue::Null => statement.bind(None::<i64>),
                QueryValue::Integer(v) => statement.bind(*v),
                QueryValue::Real(v) => statement.bind(*v),
                QueryValue::Text(v) => statement.bind(v.as_str()),
                QueryValue::Blob(v) => statement.bind(v.as_slice()),
            })
    }

    fn db_error(context: &str, e: sqlx::Error) -> StoreError {
        warn!(error = %e, context, "SQLite call failed");
        StoreError::DatabaseError(format!("{context}: {e}"))
    }
}

#[async_trait]
impl DatabaseAdapter for SqliteAdapter {
    async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| Self::db_error("ping", e))
    }

    async fn select(&self, query: &str, params: &[QueryValue]) -> Result<Vec<String>> {
        trace!(sql = %query, params = params.len(), "select");
        let rows = Self::prepare(query, params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Self::db_error("select", e))?;

        let mut fields = Vec::with_capacity(rows.first().map_or(0, |r| r.len()) * rows.len());
        for row in &rows {
            for ordinal in 0..row.len() {
                fields.push(Self::column_value(row, ordinal).to_field());
            }
        }
        debug!(rows = rows.len(), fields = fields.len(), "Select returned");
        Ok(fields)
    }

    async fn query(&self, query: &str, params: &[QueryValue]) -> Result<Vec<QueryRow>> {
        trace!(sql = %query, params = params.len(), "query");
        Self::prepare(query, params)
            .fetch_all(&self.pool)
            .await
            .map(|rows| rows.iter().map(Self::named_row).collect())
            .map_err(|e| Self::db_error("query", e))
    }

    async fn query_one_optional(
        &self,
        query: &str,
        params: &[QueryValue],
    ) -> Result<Option<QueryRow>> {
        Self::prepare(query, params)
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.as_ref().map(Self::named_row))
            .map_err(|e| Self::db_error("lookup", e))
    }

    async fn execute(&self, statement: &str, params: &[QueryValue]) -> Result<u64> {
        trace!(sql = %statement, params = params.len(), "execute");
        Self::prepare(statement, params)
            .execute(&self.pool)
            .await
            .map(|done| done.rows_affected())
            .map_err(|e| Self::db_error("execute", e))
    }

    async fn insert(&self, statement: &str, params: &[QueryValue]) -> Result<i64> {
        Self::prepare(statement, params)
            .execute(&self.pool)
            .await
            .map(|done| done.last_insert_rowid())
            .map_err(|e| Self::db_error("insert", e))
    }

    async fn execute_batch(&self, statements: Vec<(String, Vec<QueryValue>)>) -> Result<Vec<u64>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Self::db_error("begin", e))?;

        let mut affected = Vec::new();
        for (statement, params) in &statements {
            let done = Self::prepare(statement, params)
                .execute(&mut *tx)
                .await
                .map_err(|e| Self::db_error("batch", e))?;
            affected.push(done.rows_affected());
        }
        tx.commit().await.map_err(|e| Self::db_error("commit", e))?;

        debug!(statements = statements.len(), ?affected, "Batch committed");
        Ok(affected)
    }
}
