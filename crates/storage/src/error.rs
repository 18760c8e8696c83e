//! Storage error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors from the key-value layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend rejected or failed the operation.
    #[error("database error: {0}")]
    Backend(String),

    /// The handle was closed before the operation.
    #[error("database is closed")]
    Closed,

    /// Filesystem-level failure while opening or removing a database.
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}
