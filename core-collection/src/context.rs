//! Shared services handed to every collection.
//!
//! Several collections may share one query worker pool and one event bus;
//! a [`CollectionContext`] bundles both so they are passed explicitly rather
//! than reached through globals.

use crate::error::Result;
use crate::query::QueryPool;
use core_runtime::config::CollectionConfig;
use core_runtime::events::EventBus;
use std::sync::Arc;

#[derive(Clone)]
pub struct CollectionContext {
    pub pool: Arc<QueryPool>,
    pub events: EventBus,
}

impl CollectionContext {
    pub fn new(pool: Arc<QueryPool>, events: EventBus) -> Self {
        Self { pool, events }
    }

    /// Start a worker pool and an event bus sized by `config`.
    pub fn from_config(config: &CollectionConfig) -> Result<Self> {
        let pool = QueryPool::new(config.query_worker_threads)?;
        Ok(Self::new(
            Arc::new(pool),
            EventBus::new(config.event_buffer_size),
        ))
    }
}
