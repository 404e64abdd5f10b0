//! Release orchestration core for API gateway data planes.
//!
//! This crate turns a gateway configuration change into deployed state on
//! every data plane the gateway is bound to, and unwinds that state when a
//! gateway or stage is disabled or deleted.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Caller (API layer, CLI)                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ DispatchRequest
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Dispatcher                           │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Validator  │ │  Resolver   │ │  Flows + Lifecycle  │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ commit, then schedule
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   RolloutTaskScheduler ──► GroupTracker ──► ReleaseRecorder │
//! └─────────────────────────────────────────────────────────────┘
//!               │                              │
//!               ▼                              ▼
//!        ┌──────────────┐               ┌──────────┐
//!        │   Backends   │               │  Store   │
//!        │ registry/    │               │ (RocksDB)│
//!        │ chart        │               └──────────┘
//!        └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use apigw_release_control::{
//!     Backends, Dispatcher, DispatchRequest, ExecutionMode, NoopBackend, ReleaseValidator,
//!     RolloutTaskScheduler,
//! };
//! use apigw_release_core::{GatewayId, StageId};
//! use apigw_release_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/apigw-release")?);
//! let backends = Backends::uniform(Arc::new(NoopBackend::new()));
//! let scheduler = Arc::new(RolloutTaskScheduler::new(Arc::clone(&store), backends));
//! let dispatcher = Dispatcher::new(store, scheduler, ReleaseValidator::new("2.0"));
//!
//! let request = DispatchRequest::new("manual-publish", GatewayId::new(7), "alice")
//!     .with_stage(StageId::new(1))
//!     .with_mode(ExecutionMode::Sync);
//! let result = dispatcher.trigger(request).await?;
//!
//! for outcome in result.outcomes() {
//!     println!("{:?} {:?}", outcome.data_plane_id, outcome.status);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! See the [`lifecycle`] module for the history row state machine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod backend;
pub mod deprovision;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod flows;
pub mod lifecycle;
pub mod recorder;
pub mod resolver;
pub mod scheduler;
pub mod transaction;
pub mod types;
pub mod validator;

pub use backend::{
    Backends, ChartRolloutBackend, DeploymentBackend, DeploymentRequest, JobReceipt, JobState,
    NoopBackend, RegistryPushBackend,
};
pub use deprovision::{Deprovisioner, HttpDeprovisioner, NoopDeprovisioner};
pub use dispatcher::{classify, trigger_type_for, Dispatcher};
pub use error::{BackendError, PublishError, Result, ValidationError};
pub use events::{EventReporter, NoopEventReporter, TracingEventReporter};
pub use flows::PublishFlow;
pub use recorder::ReleaseRecorder;
pub use resolver::DataPlaneResolver;
pub use scheduler::{
    CompletionHandler, GroupVerdict, RolloutTaskScheduler, TaskGroup, TaskHandle, TaskOutcome,
};
pub use transaction::Transaction;
pub use types::{
    Credentials, DispatchReport, DispatchRequest, DispatchResult, DispatchSummary, ExecutionMode,
    PublisherConfig, TargetOutcome,
};
pub use validator::{ReleaseValidator, ValidationMode};

/// In-memory collaborators for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    pub use crate::backend::mock::MockBackend;
    pub use crate::deprovision::mock::MockDeprovisioner;
    pub use crate::events::mock::{RecordedEvent, RecordingEventReporter};
}

// Re-export commonly used types from dependencies for convenience
pub use apigw_release_core::{AttemptId, DataPlaneId, GatewayId, HistoryId, StageId, TaskId};
pub use apigw_release_store::{
    AttemptStatus, HistoryStatus, PublishAttempt, PublishSource, Release, ReleaseHistory,
    TriggerPublishType,
};
