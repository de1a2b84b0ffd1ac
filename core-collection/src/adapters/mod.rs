//! Drivers behind [`store_traits::DatabaseAdapter`].

pub mod sqlite_native;

pub use sqlite_native::SqliteAdapter;
