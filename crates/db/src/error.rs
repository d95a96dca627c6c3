use procapi_core::error::CoreError;
use procapi_core::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A stored row could not be mapped onto the domain type.
    #[error("Corrupt job row: {0}")]
    Corrupt(String),

    /// Reading a durable log object failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Core(#[from] CoreError),
}
