//! SQLite pool behind a [`SqlCollection`](crate::sql::SqlCollection).
//!
//! [`create_pool`] opens the database, applies the embedded schema from
//! `migrations/` and checks that the collection tables answer before the
//! pool is handed out. File databases run in WAL mode so query workers can
//! read while a mutator writes.
//!
//! An in-memory database lives exactly as long as its connection, so
//! [`DatabaseConfig::in_memory`] pins the pool to one connection that is never
//! recycled. [`create_test_pool`] is that configuration, migrated.
//!
//! ```rust,ignore
//! use core_collection::db::{create_pool, DatabaseConfig};
//!
//! let pool = create_pool(DatabaseConfig::new("collection.db").readers(4)).await?;
//! ```

use crate::{CollectionError, Result};
use core_runtime::config::CollectionConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the collection database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    Memory,
}

/// Pool settings of one collection database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub location: DatabaseLocation,
    /// Upper bound on pooled connections. Query workers read in parallel,
    /// mutators need one more.
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Connections idle for longer are closed; `None` keeps them.
    pub idle_timeout: Option<Duration>,
    /// Prepared statements cached per connection. Query makers render a
    /// handful of shapes, so a small cache hits most of the time.
    pub statement_cache_capacity: usize,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DatabaseLocation::File(path.into()),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            statement_cache_capacity: 64,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            location: DatabaseLocation::Memory,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: None,
            statement_cache_capacity: 64,
        }
    }

    /// Settings for `config`: its database file with one reader per query
    /// worker, or a private in-memory database.
    pub fn from_collection_config(config: &CollectionConfig) -> Self {
        match &config.database_path {
            Some(path) => Self::new(path).readers(config.query_worker_threads),
            None => Self::in_memory(),
        }
    }

    /// Size the pool for `readers` concurrent queries plus one writer.
    /// In-memory databases stay on their single connection.
    pub fn readers(mut self, readers: usize) -> Self {
        if self.location != DatabaseLocation::Memory {
            self.max_connections = u32::try_from(readers).unwrap_or(u32::MAX).saturating_add(1);
        }
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.location == DatabaseLocation::Memory
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let options = match &self.location {
            DatabaseLocation::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal),
            DatabaseLocation::Memory => SqliteConnectOptions::new().in_memory(true),
        };
        options
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .pragma("cache_size", "-16000")
            .statement_cache_capacity(self.statement_cache_capacity)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn describe(location: &DatabaseLocation) -> String {
    match location {
        DatabaseLocation::File(path) => {
            core_runtime::logging::strip_path(&path.to_string_lossy()).to_string()
        }
        DatabaseLocation::Memory => ":memory:".to_string(),
    }
}

/// Open, migrate and check the collection database.
///
/// # Errors
///
/// [`CollectionError::Database`] when the file cannot be opened or the
/// check query fails, [`CollectionError::Migration`] when the schema cannot
/// be applied.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    let database = describe(&config.location);
    info!(
        %database,
        max_connections = config.max_connections,
        "Opening collection database"
    );

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(if config.is_in_memory() {
            None
        } else {
            Some(Duration::from_secs(1800))
        })
        .connect_with(config.connect_options())
        .await
        .map_err(|e| {
            warn!(%database, error = %e, "Cannot open collection database");
            CollectionError::Database(e)
        })?;

    migrate(&pool).await?;
    check_schema(&pool).await?;

    debug!(%database, connections = pool.size(), "Collection database ready");
    Ok(pool)
}

/// Migrated single-connection in-memory pool.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

async fn migrate(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        warn!(error = %e, "Collection schema migration failed");
        CollectionError::Migration(e.to_string())
    })?;
    debug!("Collection schema up to date");
    Ok(())
}

/// The track query joins every collection table; if that compiles the
/// schema is usable.
async fn check_schema(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(
        "SELECT COUNT(*) FROM tracks \
         LEFT JOIN urls ON urls.id = tracks.url \
         LEFT JOIN statistics ON statistics.url = tracks.url \
         LEFT JOIN artists ON artists.id = tracks.artist \
         LEFT JOIN albums ON albums.id = tracks.album \
         LEFT JOIN genres ON genres.id = tracks.genre \
         LEFT JOIN composers ON composers.id = tracks.composer \
         LEFT JOIN years ON years.id = tracks.year",
    )
    .fetch_one(pool)
    .await
    .map_err(|e| {
        warn!(error = %e, "Collection schema check failed");
        CollectionError::Database(e)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn test_migrated_pool_has_collection_tables() {
        let pool = create_test_pool().await.unwrap();

        let tables: Vec<String> =
            sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap()
                .iter()
                .map(|row| row.get::<String, _>("name"))
                .collect();

        for expected in [
            "albums",
            "artists",
            "composers",
            "genres",
            "statistics",
            "tracks",
            "urls",
            "years",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
        assert!(check_schema(&pool).await.is_ok());
    }

    #[tokio::test]
    async fn test_in_memory_pool_keeps_rows_between_statements() {
        let pool = create_test_pool().await.unwrap();
        sqlx::query("INSERT INTO artists (name) VALUES ('Firefly')")
            .execute(&pool)
            .await
            .unwrap();

        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM artists")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("n");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_foreign_keys_are_enforced() {
        let pool = create_test_pool().await.unwrap();
        let result = sqlx::query("INSERT INTO albums (name, artist) VALUES ('Elements', 99)")
            .execute(&pool)
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_pool_sized_from_collection_config() {
        let config = CollectionConfig::builder()
            .collection_id("localCollection")
            .database_path("/tmp/collection.db")
            .query_worker_threads(3)
            .build()
            .unwrap();
        let db = DatabaseConfig::from_collection_config(&config);
        assert_eq!(db.max_connections, 4);
        assert_eq!(
            db.location,
            DatabaseLocation::File(PathBuf::from("/tmp/collection.db"))
        );

        let memory = CollectionConfig::builder()
            .collection_id("scratch")
            .query_worker_threads(3)
            .build()
            .unwrap();
        let db = DatabaseConfig::from_collection_config(&memory);
        assert!(db.is_in_memory());
        assert_eq!(db.max_connections, 1);
    }
}
