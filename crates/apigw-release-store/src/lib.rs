//! `RocksDB` storage layer for gateway release records.
//!
//! This crate persists the records the release orchestration core owns
//! (releases, history rows, rollout tasks, attempt aggregates) and the
//! read-only configuration it needs (gateways, stages, resource versions,
//! data planes and their bindings).
//!
//! # Architecture
//!
//! Every record type has its own column family; see [`schema::cf`]. History
//! rows and tasks are additionally indexed by stage and by attempt for
//! ordered prefix scans.
//!
//! Records created by one orchestration call are committed together through
//! [`Store::apply`], which writes a single atomic batch.
//!
//! # Example
//!
//! ```no_run
//! use apigw_release_store::{RocksStore, Store};
//! use apigw_release_core::GatewayId;
//!
//! let store = RocksStore::open("/tmp/apigw-release-db").unwrap();
//!
//! // List the live releases of a gateway
//! let releases = store.list_releases(GatewayId::new(1), None).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;
pub mod write;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{
    AttemptStatus, BackendHost, DataPlane, DataPlaneKind, DataPlaneReleaseTask, Gateway,
    GatewayDataPlaneBinding, GatewayStatus, HistoryStatus, HostingType, PublishAttempt,
    PublishSource, Release, ReleaseHistory, ResourceEntry, ResourceVersion, RolloutMechanism,
    Stage, StageBackend, StageStatus, TaskStatus, TriggerPublishType, UnknownSource,
};
pub use write::{WriteOp, WriteSet};

use apigw_release_core::{
    AttemptId, DataPlaneId, GatewayId, HistoryId, ResourceVersionId, StageId, TaskId,
};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Configuration (synced from the CRUD layer)
    // =========================================================================

    /// Insert or update a gateway record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_gateway(&self, gateway: &Gateway) -> Result<()>;

    /// Get a gateway by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_gateway(&self, gateway_id: GatewayId) -> Result<Option<Gateway>>;

    /// Insert or update a stage record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_stage(&self, stage: &Stage) -> Result<()>;

    /// Get a stage by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_stage(&self, stage_id: StageId) -> Result<Option<Stage>>;

    /// Insert or update a resource version snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_resource_version(&self, version: &ResourceVersion) -> Result<()>;

    /// Get a resource version by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_resource_version(&self, id: ResourceVersionId) -> Result<Option<ResourceVersion>>;

    /// Insert or update a data plane record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_data_plane(&self, data_plane: &DataPlane) -> Result<()>;

    /// Get a data plane by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_data_plane(&self, data_plane_id: DataPlaneId) -> Result<Option<DataPlane>>;

    /// Insert or update a gateway to data plane binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_binding(&self, binding: &GatewayDataPlaneBinding) -> Result<()>;

    /// List every binding of a gateway, active or not, in data plane order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_bindings(&self, gateway_id: GatewayId) -> Result<Vec<GatewayDataPlaneBinding>>;

    // =========================================================================
    // Releases
    // =========================================================================

    /// Get the release pointer of a stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_release(&self, gateway_id: GatewayId, stage_id: StageId) -> Result<Option<Release>>;

    /// List the release pointers of a gateway in stage order, optionally
    /// narrowed to one stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_releases(&self, gateway_id: GatewayId, stage_id: Option<StageId>)
        -> Result<Vec<Release>>;

    /// Insert or update a release pointer.
    ///
    /// The write is a compare-and-set on `released_at`: if the stored
    /// pointer originates from a newer history row the call is ignored.
    /// Returns true if the pointer was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn upsert_release(&self, release: &Release) -> Result<bool>;

    // =========================================================================
    // History rows, tasks and attempts
    // =========================================================================

    /// Commit a write set as one atomic batch.
    ///
    /// Create operations are create-if-absent, which makes re-applying the
    /// writes of a retried attempt a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails; nothing is written.
    fn apply(&self, writes: &WriteSet) -> Result<()>;

    /// Get a history row by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_history(&self, history_id: &HistoryId) -> Result<Option<ReleaseHistory>>;

    /// List the history rows of a stage, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_histories_by_stage(
        &self,
        gateway_id: GatewayId,
        stage_id: StageId,
    ) -> Result<Vec<ReleaseHistory>>;

    /// List the history rows of an attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_histories_by_attempt(&self, attempt_id: &AttemptId) -> Result<Vec<ReleaseHistory>>;

    /// Update the status and message of a history row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the row doesn't exist and
    /// `StoreError::Immutable` if it is already terminal.
    fn update_history_status(
        &self,
        history_id: &HistoryId,
        status: HistoryStatus,
        message: &str,
    ) -> Result<ReleaseHistory>;

    /// Get a task by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_task(&self, task_id: &TaskId) -> Result<Option<DataPlaneReleaseTask>>;

    /// List the tasks of an attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_tasks_by_attempt(&self, attempt_id: &AttemptId) -> Result<Vec<DataPlaneReleaseTask>>;

    /// Update the status of a task, recording the backend job id and message.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the task doesn't exist and
    /// `StoreError::Immutable` if it is already terminal.
    fn update_task_status(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        job_id: Option<&str>,
        message: &str,
    ) -> Result<DataPlaneReleaseTask>;

    /// Get an attempt aggregate by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_attempt(&self, attempt_id: &AttemptId) -> Result<Option<PublishAttempt>>;

    /// Replace an attempt aggregate.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_attempt(&self, attempt: &PublishAttempt) -> Result<()>;
}
