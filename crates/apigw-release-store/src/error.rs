//! Error types for the storage layer.

use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("record not found")]
    NotFound,

    /// The record reached a terminal state and can no longer change.
    #[error("record is immutable: {0}")]
    Immutable(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Returns true if retrying the operation may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}
