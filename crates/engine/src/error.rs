use procapi_cloud::backend::BackendError;
use procapi_core::error::CoreError;
use procapi_core::storage::StorageError;
use procapi_db::DbError;

/// Errors surfaced by the engine to its callers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed job request; nothing was created.
    #[error(transparent)]
    Validation(#[from] CoreError),

    /// The compute backend rejected a submission or kill.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Kill or status change aimed at a job that already finished.
    #[error("can't call delete on an already completed, failed, or dismissed job")]
    TerminalState,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("job {0} not found")]
    NotFound(String),

    /// The job exists but the requested artifact is not available for it.
    #[error("{0}")]
    NotAvailable(String),

    /// New submissions are refused once shutdown has begun.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// A stored object could not be decoded.
    #[error("Malformed stored object: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
