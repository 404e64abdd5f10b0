//! Core types for gateway release orchestration.
//!
//! This crate provides the foundational types shared by the store and the
//! orchestration core:
//!
//! - **Identifiers**: relational keys for gateways, stages, resource versions
//!   and data planes, plus digest-based identifiers for publish attempts,
//!   history rows and rollout tasks
//! - **Error types**: common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use apigw_release_core::{AttemptId, DataPlaneId, GatewayId, HistoryId, StageId};
//!
//! let gateway = GatewayId::new(7);
//! let attempt = AttemptId::from_key(gateway, "ci-build-1842");
//!
//! // History identifiers are derived, so a retried attempt maps to the same row.
//! let first = HistoryId::derive(&attempt, StageId::new(1), DataPlaneId::new(3));
//! let again = HistoryId::derive(&attempt, StageId::new(1), DataPlaneId::new(3));
//! assert_eq!(first, again);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;

pub use error::{CoreError, Result};
pub use ids::{
    AttemptId, DataPlaneId, GatewayId, HistoryId, IdError, ResourceVersionId, StageId, TaskId,
    TaskIntent,
};
