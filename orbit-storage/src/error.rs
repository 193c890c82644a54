//! Error types for the blob storage layer.

use thiserror::Error;

/// Convenience alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors surfaced by blob store implementations.
///
/// Backend failures (I/O errors, a locked database file, exhausted disk)
/// propagate to the caller unchanged; the store never retries or swallows
/// them. Callers decide whether a failed read is fatal.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying database rejected or failed an operation.
    #[error("storage backend error: {0}")]
    Backend(#[from] duckdb::Error),

    /// The store cannot serve requests at all (poisoned lock, closed handle).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
