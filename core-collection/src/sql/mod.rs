//! Collection backed by a relational store.

mod collection;
mod query_maker;
pub mod schema;

pub use collection::SqlCollection;
pub use query_maker::SqlQueryMaker;
