//! # Backing Store Contract
//!
//! Traits the collection engine requires from a row-producing backing store.
//!
//! ## Overview
//!
//! The query engine never talks to a database driver directly. It issues
//! SELECT-shaped statements with positional bind values and receives either a
//! flat list of string fields (the shape the positional row decoders expect) or
//! named rows for ad hoc lookups. Any store that can honour
//! [`DatabaseAdapter`](database::DatabaseAdapter) can back a SQL collection:
//! the bundled SQLite adapter, an in-process fake, or a mock in tests.
//!
//! ## Error Handling
//!
//! Every operation returns [`StoreError`](error::StoreError). Callers in the
//! query layer log failures and fall back to empty results; mutation paths
//! propagate them.

pub mod database;
pub mod error;

pub use database::{DatabaseAdapter, QueryRow, QueryValue};
pub use error::{Result, StoreError};
