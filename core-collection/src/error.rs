use store_traits::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Blocking query called from a query worker thread")]
    BlockingOnWorker,

    #[error("Collection is gone")]
    CollectionGone,

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CollectionError>;
