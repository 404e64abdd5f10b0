//! Common error types for gateway release orchestration.
//!
//! This module provides shared error types that are used across multiple crates.

use crate::ids::{AttemptId, GatewayId, ResourceVersionId, StageId, TaskId};
use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the release system.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A gateway with the specified ID was not found.
    #[error("gateway not found: {0}")]
    GatewayNotFound(GatewayId),

    /// A stage with the specified ID was not found.
    #[error("stage not found: {0}")]
    StageNotFound(StageId),

    /// A resource version with the specified ID was not found.
    #[error("resource version not found: {0}")]
    ResourceVersionNotFound(ResourceVersionId),

    /// No rollout task with the specified ID exists.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// No publish attempt with the specified ID exists.
    #[error("attempt not found: {0}")]
    AttemptNotFound(AttemptId),

    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns true if the error names a missing record.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::GatewayNotFound(_)
                | Self::StageNotFound(_)
                | Self::ResourceVersionNotFound(_)
                | Self::TaskNotFound(_)
                | Self::AttemptNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_classification() {
        assert!(CoreError::GatewayNotFound(GatewayId::new(1)).is_not_found());
        assert!(CoreError::TaskNotFound(TaskId::from_bytes([1u8; 32])).is_not_found());
        assert!(!CoreError::Internal("boom".to_string()).is_not_found());
        assert!(!CoreError::from(crate::ids::IdError::InvalidHex).is_not_found());
    }

    #[test]
    fn messages_name_the_record() {
        let err = CoreError::StageNotFound(StageId::new(12));
        assert_eq!(err.to_string(), "stage not found: 12");
    }
}
