//! Error types for release orchestration.
//!
//! [`PublishError`] is what a dispatch call returns. Errors local to one
//! `(release, data plane)` pair never surface through it; they are recorded
//! as `FAILURE` history rows instead.

use apigw_release_core::{CoreError, GatewayId, HistoryId, IdError, StageId};
use apigw_release_store::{HistoryStatus, StoreError};
use thiserror::Error;

/// A result type using `PublishError`.
pub type Result<T> = std::result::Result<T, PublishError>;

/// Errors that can occur while orchestrating a publish.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The trigger could not be mapped to a flow. Raised before any write.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A pre-flight check rejected the release.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// No active data plane is bound to the gateway.
    #[error("gateway {gateway_id} has no active data plane for stage {stage_id}")]
    Resolution {
        /// The gateway being published.
        gateway_id: GatewayId,
        /// The stage being published.
        stage_id: StageId,
    },

    /// A deployment backend rejected or failed the task.
    #[error("deployment failed: {0}")]
    Deployment(#[from] BackendError),

    /// A referenced record does not exist.
    #[error(transparent)]
    NotFound(#[from] CoreError),

    /// The requested history status change is not part of the state machine.
    #[error(
        "invalid status transition for history {history_id}: cannot transition from {from:?} to {to:?}"
    )]
    InvalidTransition {
        /// The history row being transitioned.
        history_id: HistoryId,
        /// The current status.
        from: HistoryStatus,
        /// The requested status.
        to: HistoryStatus,
    },

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PublishError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::Configuration(_) | Self::InvalidId(_) => 400,
            Self::NotFound(_) => 404,
            Self::Resolution { .. } | Self::InvalidTransition { .. } => 409,
            Self::Validation(_) => 422,
            Self::Deployment(_) => 502,
            Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// The message stored on a `FAILURE` row or task for this error.
    ///
    /// Validation and backend causes are kept verbatim, without the
    /// variant prefix of `Display`.
    #[must_use]
    pub fn failure_message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::Deployment(e) => e.to_string(),
            other => other.to_string(),
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retriable(),
            Self::Deployment(e) => e.is_retriable(),
            Self::Internal(_) => true,
            _ => false,
        }
    }
}

/// Reasons a release fails pre-flight validation.
///
/// The `Display` output is stored verbatim as the history row message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The gateway is not active.
    #[error("gateway {gateway} is not active, enable it before publishing")]
    GatewayInactive {
        /// Gateway name.
        gateway: String,
    },

    /// The stage is not active.
    #[error("stage {stage} is not active, enable it before publishing")]
    StageInactive {
        /// Stage name.
        stage: String,
    },

    /// The stage has no upstream host to route to.
    #[error("stage {stage} has no backend hosts configured")]
    NoBackendHosts {
        /// Stage name.
        stage: String,
    },

    /// The resource version was written with an outdated schema.
    #[error(
        "resource version {version} uses schema {schema} but {current} is required, create a new resource version first"
    )]
    SchemaMismatch {
        /// Human-readable resource version.
        version: String,
        /// Schema the version was written with.
        schema: String,
        /// Schema the data planes expect.
        current: String,
    },

    /// A placeholder refers to a variable the stage does not define.
    #[error("stage {stage} does not define variable {name}")]
    MissingVariable {
        /// Stage name.
        stage: String,
        /// Variable name.
        name: String,
    },

    /// A variable substituted into a path has a malformed value.
    #[error("variable {name} of stage {stage} is not a valid path segment: {value}")]
    InvalidPathVariable {
        /// Stage name.
        stage: String,
        /// Variable name.
        name: String,
        /// Offending value.
        value: String,
    },

    /// A variable substituted into a host has a malformed value.
    #[error("variable {name} of stage {stage} is not a valid host: {value}")]
    InvalidHostVariable {
        /// Stage name.
        stage: String,
        /// Variable name.
        name: String,
        /// Offending value.
        value: String,
    },
}

/// Errors reported by deployment backends and the de-provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend refused the job. The message is the backend's own.
    #[error("{0}")]
    Rejected(String),

    /// The request never got an answer.
    #[error("backend request failed: {0}")]
    Transport(String),

    /// The backend answered with something unparseable.
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Returns true if retrying the call may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        assert_eq!(
            PublishError::Configuration("unknown source".to_string()).http_status_code(),
            400
        );
        assert_eq!(
            PublishError::NotFound(CoreError::GatewayNotFound(GatewayId::new(1)))
                .http_status_code(),
            404
        );
        assert_eq!(
            PublishError::Resolution {
                gateway_id: GatewayId::new(1),
                stage_id: StageId::new(2),
            }
            .http_status_code(),
            409
        );
        assert_eq!(
            PublishError::Validation(ValidationError::NoBackendHosts {
                stage: "prod".to_string()
            })
            .http_status_code(),
            422
        );
        assert_eq!(
            PublishError::Deployment(BackendError::Rejected("quota".to_string()))
                .http_status_code(),
            502
        );
    }

    #[test]
    fn retriable_errors() {
        assert!(PublishError::Store(StoreError::Database("busy".to_string())).is_retriable());
        assert!(!PublishError::Store(StoreError::NotFound).is_retriable());
        assert!(PublishError::Deployment(BackendError::Transport("reset".to_string())).is_retriable());
        assert!(!PublishError::Deployment(BackendError::Rejected("no".to_string())).is_retriable());
        assert!(!PublishError::Configuration("x".to_string()).is_retriable());
    }

    #[test]
    fn failure_messages_drop_the_variant_prefix() {
        let validation = PublishError::from(ValidationError::NoBackendHosts {
            stage: "prod".to_string(),
        });
        assert_eq!(validation.to_string(), "validation failed: stage prod has no backend hosts configured");
        assert_eq!(validation.failure_message(), "stage prod has no backend hosts configured");

        let deployment = PublishError::from(BackendError::Rejected("quota exceeded".to_string()));
        assert_eq!(deployment.failure_message(), "quota exceeded");

        let resolution = PublishError::Resolution {
            gateway_id: GatewayId::new(1),
            stage_id: StageId::new(2),
        };
        assert_eq!(resolution.failure_message(), resolution.to_string());
    }

    #[test]
    fn rejected_message_is_verbatim() {
        let err = BackendError::Rejected("chart values invalid: replicas".to_string());
        assert_eq!(err.to_string(), "chart values invalid: replicas");
    }

    #[test]
    fn validation_messages_name_the_stage() {
        let err = ValidationError::NoBackendHosts {
            stage: "prod".to_string(),
        };
        assert!(err.to_string().contains("prod"));
    }
}
