use thiserror::Error;

/// Failure reported by a backing store. Carries the driver's message; the
/// driver error itself stays inside the adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
