//! Driver-neutral access to the relational store behind a SQL collection.
//!
//! The query executor renders statements and hands them to a
//! [`DatabaseAdapter`]; it never links a driver itself.
//!
//! ## Result shapes
//!
//! - [`DatabaseAdapter::select`] returns every field of every row, row-major,
//!   as strings. `NULL` becomes the empty string. Positional decoders rely on
//!   the column order of the statement, never on column names.
//! - [`DatabaseAdapter::query`] returns named rows for lookups that read a
//!   handful of columns by name.
//!
//! ## Usage
//!
//! ```ignore
//! use store_traits::{DatabaseAdapter, QueryValue};
//!
//! let fields = adapter
//!     .select("SELECT name, id FROM artists WHERE name LIKE ?", &[QueryValue::from("%a%")])
//!     .await?;
//! for pair in fields.chunks_exact(2) {
//!     println!("{} -> {}", pair[0], pair[1]);
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Named row: column name to value.
pub type QueryRow = std::collections::HashMap<String, QueryValue>;

/// One SQLite storage-class value, used both for bound parameters and results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl QueryValue {
    /// Integer view. Text is parsed; reals are truncated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            QueryValue::Integer(i) => Some(*i),
            QueryValue::Real(r) => Some(*r as i64),
            QueryValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            QueryValue::Real(r) => Some(*r),
            QueryValue::Integer(i) => Some(*i as f64),
            QueryValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            QueryValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Render the value the way `select` reports fields.
    ///
    /// `NULL` and blobs render as the empty string.
    pub fn to_field(&self) -> String {
        match self {
            QueryValue::Null | QueryValue::Blob(_) => String::new(),
            QueryValue::Integer(i) => i.to_string(),
            QueryValue::Real(r) => r.to_string(),
            QueryValue::Text(s) => s.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, QueryValue::Null)
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        QueryValue::Integer(value)
    }
}

impl From<i32> for QueryValue {
    fn from(value: i32) -> Self {
        QueryValue::Integer(i64::from(value))
    }
}

impl From<f64> for QueryValue {
    fn from(value: f64) -> Self {
        QueryValue::Real(value)
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Text(value.to_owned())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Text(value)
    }
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(QueryValue::Null)
    }
}

/// Statement execution for a SQL collection.
///
/// One adapter is shared by the collection, its entities and every query
/// worker. Failures surface as [`StoreError`](crate::StoreError) and are
/// never retried here.
#[async_trait::async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Cheap round trip proving the store answers.
    async fn health_check(&self) -> Result<()>;

    /// Run a SELECT-shaped statement and return every field of every row,
    /// row-major, as strings (`NULL` as empty string).
    ///
    /// # Safety
    ///
    /// User text must travel in `params`, never spliced into `query`.
    async fn select(&self, query: &str, params: &[QueryValue]) -> Result<Vec<String>>;

    /// Named rows, for lookups that read a few columns by name.
    async fn query(&self, query: &str, params: &[QueryValue]) -> Result<Vec<QueryRow>>;

    /// First named row, if any.
    async fn query_one_optional(
        &self,
        query: &str,
        params: &[QueryValue],
    ) -> Result<Option<QueryRow>>;

    /// UPDATE or DELETE; returns the affected row count.
    async fn execute(&self, statement: &str, params: &[QueryValue]) -> Result<u64>;

    /// INSERT; returns the new rowid.
    async fn insert(&self, statement: &str, params: &[QueryValue]) -> Result<i64>;

    /// Run `statements` in one transaction, returning each affected count.
    async fn execute_batch(&self, statements: Vec<(String, Vec<QueryValue>)>) -> Result<Vec<u64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_views() {
        assert_eq!(QueryValue::Integer(42).as_i64(), Some(42));
        assert_eq!(QueryValue::Real(2.5).as_f64(), Some(2.5));
        assert_eq!(QueryValue::Integer(3).as_f64(), Some(3.0));
        assert_eq!(QueryValue::Text("17".to_string()).as_i64(), Some(17));
        assert_eq!(QueryValue::Text("abc".to_string()).as_i64(), None);
        assert_eq!(QueryValue::Null.as_i64(), None);
        assert!(QueryValue::Null.is_null());
    }

    #[test]
    fn test_to_field_renders_null_as_empty() {
        assert_eq!(QueryValue::Null.to_field(), "");
        assert_eq!(QueryValue::Integer(-1).to_field(), "-1");
        assert_eq!(QueryValue::Real(4.0).to_field(), "4");
        assert_eq!(QueryValue::Text("Fire".to_string()).to_field(), "Fire");
    }

    #[test]
    fn test_from_impls() {
        assert_eq!(QueryValue::from(7i64), QueryValue::Integer(7));
        assert_eq!(QueryValue::from(7i32), QueryValue::Integer(7));
        assert_eq!(QueryValue::from("x"), QueryValue::Text("x".to_string()));
        assert_eq!(QueryValue::from(None::<i64>), QueryValue::Null);
        assert_eq!(QueryValue::from(Some(5i64)), QueryValue::Integer(5));
    }

    #[test]
    fn test_query_value_serialization() {
        let value = QueryValue::Text("Water".to_string());
        let json = serde_json::to_string(&value).unwrap();
        let back: QueryValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
