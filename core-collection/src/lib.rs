//! # Collection Query Engine
//!
//! Structured, backend-agnostic queries over a music collection.
//!
//! ## Overview
//!
//! This crate provides:
//! - Shared, identity-stable entities (tracks, artists, albums, genres,
//!   composers, years) deduplicated through a per-collection [`Registry`]
//! - The [`QueryMaker`] builder and its asynchronous result protocol, plus
//!   a [`BlockingQuery`] wrapper for synchronous callers
//! - A SQL backend ([`SqlCollection`]) over SQLite with embedded migrations
//! - A memory backend ([`MemoryCollection`]) for stores without a database
//! - [`CollectionManager`] and [`FederatedQueryMaker`] for querying several
//!   collections at once
//!
//! ## Example
//!
//! ```ignore
//! use core_collection::{query, Collection, CollectionContext, SqlCollection};
//! use core_collection::query::Field;
//! use core_runtime::config::CollectionConfig;
//!
//! let config = CollectionConfig::builder()
//!     .collection_id("localCollection")
//!     .database_path("/path/to/collection.db")
//!     .build()?;
//! let context = CollectionContext::from_config(&config)?;
//! let collection = SqlCollection::open(&config, context).await?;
//!
//! let mut qm = collection.query_maker();
//! qm.start_artist_query().order_by(Field::Artist, false);
//! for artist in query::collect(qm).await.artists("localCollection") {
//!     println!("{}", artist.sortable_name());
//! }
//! ```

pub mod adapters;
pub mod collection;
pub mod context;
pub mod db;
pub mod error;
pub mod federated;
pub mod memory;
pub mod meta;
pub mod query;
pub mod registry;
pub mod sql;

pub use collection::{Collection, MetaStore};
pub use context::CollectionContext;
pub use error::{CollectionError, Result};
pub use federated::{CollectionManager, FederatedQueryMaker};
pub use memory::MemoryCollection;
pub use meta::{DataPtr, EntityKind, Observer, TrackRecord};
pub use query::{BlockingQuery, QueryMaker, QueryObserver, QueryResult, QueryResults};
pub use registry::Registry;
pub use sql::SqlCollection;
