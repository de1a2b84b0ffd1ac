//! # Collection Configuration Module
//!
//! Provides the settings a collection is built from.
//!
//! ## Overview
//!
//! The configuration uses a builder pattern to construct a [`CollectionConfig`].
//! It enforces fail-fast validation so a misconfigured collection is rejected
//! before any database or worker thread is created.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CollectionConfig;
//!
//! let config = CollectionConfig::builder()
//!     .collection_id("localCollection")
//!     .pretty_name("Local Collection")
//!     .database_path("/path/to/collection.db")
//!     .cover_dir("/path/to/albumcovers")
//!     .query_worker_threads(2)
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CollectionConfig;
//!
//! // Missing collection id
//! let config = CollectionConfig::builder()
//!     .database_path("/path/to/collection.db")
//!     .build()
//!     .expect("Should fail - missing collection id");
//! ```

use crate::error::{Error, Result};
use std::path::PathBuf;

/// Default number of query worker threads.
pub const DEFAULT_QUERY_WORKER_THREADS: usize = 4;

/// Upper bound accepted for `query_worker_threads`.
pub const MAX_QUERY_WORKER_THREADS: usize = 64;

/// Default capacity of the collection event bus.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Settings for one collection.
///
/// Use [`CollectionConfigBuilder`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionConfig {
    /// Stable identifier, attached to every result batch
    pub collection_id: String,

    /// Human readable name
    pub pretty_name: String,

    /// SQLite database file. `None` selects an in-memory database.
    pub database_path: Option<PathBuf>,

    /// Threads in the query worker pool
    pub query_worker_threads: usize,

    /// Capacity of the event bus
    pub event_buffer_size: usize,

    /// Directory holding album cover images
    pub cover_dir: Option<PathBuf>,

    /// Whether entity mutators persist changes
    pub writable: bool,
}

impl CollectionConfig {
    /// Creates a new builder for constructing a `CollectionConfig`.
    pub fn builder() -> CollectionConfigBuilder {
        CollectionConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Collection id and pretty name are not empty
    /// - Database path, when given, is not empty
    /// - Worker thread count is within `1..=64`
    /// - Event buffer size is greater than zero
    pub fn validate(&self) -> Result<()> {
        if self.collection_id.trim().is_empty() {
            return Err(Error::Config("Collection id cannot be empty".to_string()));
        }

        if self.pretty_name.trim().is_empty() {
            return Err(Error::Config("Pretty name cannot be empty".to_string()));
        }

        if let Some(path) = &self.database_path {
            if path.as_os_str().is_empty() {
                return Err(Error::Config(
                    "Database path cannot be empty. Omit it to use an in-memory database."
                        .to_string(),
                ));
            }
        }

        if self.query_worker_threads == 0 {
            return Err(Error::Config(
                "Query worker threads must be greater than 0".to_string(),
            ));
        }

        if self.query_worker_threads > MAX_QUERY_WORKER_THREADS {
            return Err(Error::Config(format!(
                "Query worker threads exceeds maximum of {}",
                MAX_QUERY_WORKER_THREADS
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if let Some(dir) = &self.cover_dir {
            if dir.as_os_str().is_empty() {
                return Err(Error::Config("Cover directory cannot be empty".to_string()));
            }
        }

        Ok(())
    }

    /// Whether the collection is backed by an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.database_path.is_none()
    }
}

/// Builder for constructing [`CollectionConfig`] instances.
#[derive(Debug, Default)]
pub struct CollectionConfigBuilder {
    collection_id: Option<String>,
    pretty_name: Option<String>,
    database_path: Option<PathBuf>,
    query_worker_threads: Option<usize>,
    event_buffer_size: Option<usize>,
    cover_dir: Option<PathBuf>,
    writable: Option<bool>,
}

impl CollectionConfigBuilder {
    /// Sets the collection id (required).
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CollectionConfig;
    ///
    /// let builder = CollectionConfig::builder()
    ///     .collection_id("localCollection");
    /// ```
    pub fn collection_id(mut self, id: impl Into<String>) -> Self {
        self.collection_id = Some(id.into());
        self
    }

    /// Sets the pretty name. Defaults to the collection id.
    pub fn pretty_name(mut self, name: impl Into<String>) -> Self {
        self.pretty_name = Some(name.into());
        self
    }

    /// Sets the SQLite database file.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CollectionConfig;
    ///
    /// let builder = CollectionConfig::builder()
    ///     .database_path("/path/to/collection.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the number of query worker threads.
    ///
    /// Default: 4
    pub fn query_worker_threads(mut self, threads: usize) -> Self {
        self.query_worker_threads = Some(threads);
        self
    }

    /// Sets the event bus capacity.
    ///
    /// Default: 100
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Sets the album cover directory.
    pub fn cover_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cover_dir = Some(path.into());
        self
    }

    /// Marks the collection as writable or read-only.
    ///
    /// Default: true
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = Some(writable);
        self
    }

    /// Builds the final `CollectionConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(CollectionConfig)` on success, or an error if:
    /// - The collection id is missing
    /// - Any value fails validation
    pub fn build(self) -> Result<CollectionConfig> {
        let collection_id = self.collection_id.ok_or_else(|| {
            Error::Config(
                "Collection id is required. Use .collection_id() to set it.".to_string(),
            )
        })?;

        let config = CollectionConfig {
            pretty_name: self.pretty_name.unwrap_or_else(|| collection_id.clone()),
            collection_id,
            database_path: self.database_path,
            query_worker_threads: self
                .query_worker_threads
                .unwrap_or(DEFAULT_QUERY_WORKER_THREADS),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            cover_dir: self.cover_dir,
            writable: self.writable.unwrap_or(true),
        };

        config.validate()?;

        Ok(config)
    }
}
