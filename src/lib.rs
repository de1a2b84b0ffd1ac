//! Facade over the collection workspace crates.
//!
//! Host applications depend on `amarok-collection` alone and reach the query
//! engine, the runtime conventions and the backing-store contract through the
//! re-exports below.

pub use core_collection::*;

pub use core_runtime::config::CollectionConfig;
pub use core_runtime::events::{CollectionEvent, CoreEvent, EventBus, EventStream};
pub use core_runtime::logging::{init_logging, LoggingConfig};

/// Backing-store contract implemented by relational stores.
pub mod store {
    pub use store_traits::*;
}

/// Ambient runtime: configuration, events, logging.
pub mod runtime {
    pub use core_runtime::*;
}
