//! In-memory collection backend.

mod collection;
mod filter;
mod query_maker;

pub use collection::MemoryCollection;
pub use query_maker::MemoryQueryMaker;
