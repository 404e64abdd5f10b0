//! Domain types stored in the database.
//!
//! Configuration records (gateways, stages, resource versions, data planes
//! and bindings) are synced from the relational CRUD layer and only read by
//! the orchestration core. Release records (releases, history rows, tasks
//! and attempts) are owned by the core.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use apigw_release_core::{
    AttemptId, DataPlaneId, GatewayId, HistoryId, ResourceVersionId, StageId, TaskId, TaskIntent,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Configuration records
// =============================================================================

/// Activation state of a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    /// The gateway serves traffic and may be published.
    Active,
    /// The gateway has been disabled by its operators.
    Inactive,
}

/// How a gateway's runtime is hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostingType {
    /// Routes are pushed to the shared data planes through the registry.
    #[default]
    Default,
    /// A dedicated micro-gateway rolled out from a chart.
    Micro,
    /// A programmable gateway whose code also runs on an external PaaS.
    Programmable,
}

/// A gateway record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gateway {
    /// Relational key.
    pub id: GatewayId,
    /// Unique gateway name.
    pub name: String,
    /// Current activation state.
    pub status: GatewayStatus,
    /// Hosting type, selects the rollout mechanism and de-provisioning.
    #[serde(default)]
    pub hosting_type: HostingType,
}

impl Gateway {
    /// Returns true if the gateway is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == GatewayStatus::Active
    }
}

/// Activation state of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The stage is published and serving.
    Active,
    /// The stage is offline.
    Inactive,
}

/// One upstream host of a stage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHost {
    /// `http` or `https`.
    pub scheme: String,
    /// `host[:port]`, may contain `{env.NAME}` placeholders.
    pub host: String,
    /// Load-balancing weight.
    #[serde(default = "BackendHost::default_weight")]
    pub weight: u32,
}

impl BackendHost {
    const fn default_weight() -> u32 {
        100
    }

    /// Create a host with the default weight.
    #[must_use]
    pub fn new(scheme: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            weight: Self::default_weight(),
        }
    }
}

/// Upstream configuration of one named backend inside a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageBackend {
    /// Backend name referenced by resources.
    pub name: String,
    /// Upstream hosts.
    pub hosts: Vec<BackendHost>,
}

/// A stage (environment) of a gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Relational key.
    pub id: StageId,
    /// Owning gateway.
    pub gateway_id: GatewayId,
    /// Stage name, unique per gateway.
    pub name: String,
    /// Current activation state.
    pub status: StageStatus,
    /// Upstream backends.
    #[serde(default)]
    pub backends: Vec<StageBackend>,
    /// Stage variables substituted into `{env.NAME}` placeholders.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl Stage {
    /// Returns true if the stage is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == StageStatus::Active
    }

    /// Total number of upstream hosts across all backends.
    #[must_use]
    pub fn host_count(&self) -> usize {
        self.backends.iter().map(|b| b.hosts.len()).sum()
    }
}

/// A resource (route) inside a resource version snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    /// Resource name.
    pub name: String,
    /// HTTP method.
    pub method: String,
    /// Upstream path, may contain `{env.NAME}` placeholders.
    pub path: String,
    /// Name of the stage backend serving this resource.
    pub backend: String,
    /// Per-resource upstream host overrides, may contain placeholders.
    #[serde(default)]
    pub hosts: Vec<String>,
}

/// An immutable snapshot of a gateway's resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceVersion {
    /// Relational key.
    pub id: ResourceVersionId,
    /// Owning gateway.
    pub gateway_id: GatewayId,
    /// Human-readable version, e.g. `1.4.0`.
    pub version: String,
    /// Schema version of the serialized resources.
    pub schema_version: String,
    /// Resources in the snapshot.
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Whether a data plane is shared by many gateways or dedicated to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataPlaneKind {
    /// Multi-tenant data plane fed from the shared registry.
    Shared,
    /// Dedicated or managed data plane rolled out from a chart.
    Dedicated,
}

/// A data plane runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPlane {
    /// Relational key.
    pub id: DataPlaneId,
    /// Data plane name, e.g. the cluster it runs in.
    pub name: String,
    /// Shared or dedicated.
    pub kind: DataPlaneKind,
}

/// Many-to-many link between a gateway and a data plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayDataPlaneBinding {
    /// The gateway.
    pub gateway_id: GatewayId,
    /// The data plane.
    pub data_plane_id: DataPlaneId,
    /// Whether the binding currently receives releases.
    pub active: bool,
}

// =============================================================================
// Trigger vocabulary
// =============================================================================

/// Why a publish was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishSource {
    /// An operator clicked publish.
    ManualPublish,
    /// A command-line sync.
    CliSync,
    /// The gateway was enabled.
    GatewayEnable,
    /// The gateway was disabled.
    GatewayDisable,
    /// The gateway was deleted.
    GatewayDelete,
    /// A stage was updated.
    StageUpdate,
    /// A stage was disabled.
    StageDisable,
    /// A stage was deleted.
    StageDelete,
    /// A stage backend was updated.
    BackendUpdate,
    /// A plugin was bound to a stage or resource.
    PluginBind,
    /// A plugin was unbound from a stage or resource.
    PluginUnbind,
}

impl PublishSource {
    /// Every publish source.
    pub const ALL: [Self; 11] = [
        Self::ManualPublish,
        Self::CliSync,
        Self::GatewayEnable,
        Self::GatewayDisable,
        Self::GatewayDelete,
        Self::StageUpdate,
        Self::StageDisable,
        Self::StageDelete,
        Self::BackendUpdate,
        Self::PluginBind,
        Self::PluginUnbind,
    ];

    /// The wire name of the source.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ManualPublish => "manual-publish",
            Self::CliSync => "cli-sync",
            Self::GatewayEnable => "gateway-enable",
            Self::GatewayDisable => "gateway-disable",
            Self::GatewayDelete => "gateway-delete",
            Self::StageUpdate => "stage-update",
            Self::StageDisable => "stage-disable",
            Self::StageDelete => "stage-delete",
            Self::BackendUpdate => "backend-update",
            Self::PluginBind => "plugin-bind",
            Self::PluginUnbind => "plugin-unbind",
        }
    }
}

impl fmt::Display for PublishSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a source string names no known publish source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown publish source: {0}")]
pub struct UnknownSource(pub String);

impl FromStr for PublishSource {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| UnknownSource(s.to_string()))
    }
}

/// The orchestration flow a publish source resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPublishType {
    /// Push the bound resource version live.
    RollingUpdate,
    /// Unwind live configuration while keeping it recoverable.
    RevokeDisable,
    /// Unwind live configuration permanently.
    RevokeDelete,
}

// =============================================================================
// Release records
// =============================================================================

/// The current deployed binding of a stage to a resource version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    /// The gateway.
    pub gateway_id: GatewayId,
    /// The stage.
    pub stage_id: StageId,
    /// The resource version live on the stage.
    pub resource_version_id: ResourceVersionId,
    /// History row whose success produced this pointer, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_id: Option<HistoryId>,
    /// Creation time of the originating history row; orders concurrent upserts.
    pub released_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Status of a `ReleaseHistory` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum HistoryStatus {
    /// Row built, nothing checked yet.
    Pending = 1,
    /// Pre-flight validation in progress.
    Validating = 2,
    /// At least one task has been scheduled.
    Dispatched = 3,
    /// Every task of the row succeeded.
    Success = 4,
    /// Validation, resolution or deployment failed.
    Failure = 5,
}

impl HistoryStatus {
    /// Convert the status to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true for `Success` and `Failure`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// An audit record of one publish attempt against one data plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseHistory {
    /// Derived from `(attempt, stage, data plane)`.
    pub id: HistoryId,
    /// The dispatch call this row belongs to.
    pub attempt_id: AttemptId,
    /// The gateway.
    pub gateway_id: GatewayId,
    /// The stage.
    pub stage_id: StageId,
    /// The resource version being released or revoked.
    pub resource_version_id: ResourceVersionId,
    /// Target data plane.
    pub data_plane_id: DataPlaneId,
    /// Why the publish was requested.
    pub source: PublishSource,
    /// Current status.
    pub status: HistoryStatus,
    /// User-facing message, set on failure.
    #[serde(default)]
    pub message: String,
    /// Operator who triggered the publish.
    pub created_by: String,
    /// Creation timestamp.
    pub created_time: DateTime<Utc>,
    /// Last status change.
    pub updated_time: DateTime<Utc>,
    /// Operation id of the PaaS de-provisioning call, for programmable gateways.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprovision_operation_id: Option<String>,
}

/// The mechanism used to push configuration to one data plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RolloutMechanism {
    /// Publish to the shared registry watched by shared data planes.
    SharedRegistryPush,
    /// Roll a chart out to a dedicated data plane.
    DedicatedChartRollout,
}

impl RolloutMechanism {
    /// Choose the mechanism for a gateway hosting type and a data plane kind.
    ///
    /// Micro gateways always own their runtime; everything else follows the
    /// data plane.
    #[must_use]
    pub const fn for_target(hosting_type: HostingType, kind: DataPlaneKind) -> Self {
        match (hosting_type, kind) {
            (HostingType::Micro, _) | (_, DataPlaneKind::Dedicated) => Self::DedicatedChartRollout,
            (HostingType::Default | HostingType::Programmable, DataPlaneKind::Shared) => {
                Self::SharedRegistryPush
            }
        }
    }
}

/// Status of a rollout task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Committed, waiting for a worker.
    Queued,
    /// Handed to the deployment backend.
    Running,
    /// The backend reported success.
    Succeeded,
    /// The backend reported failure.
    Failed,
}

impl TaskStatus {
    /// Returns true for `Succeeded` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Links a history row to the rollout job run for one data plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPlaneReleaseTask {
    /// Derived from `(attempt, stage, data plane, intent)`.
    pub id: TaskId,
    /// The history row; `None` for delete-flow cleanup tasks.
    pub history_id: Option<HistoryId>,
    /// The dispatch call this task belongs to.
    pub attempt_id: AttemptId,
    /// The gateway.
    pub gateway_id: GatewayId,
    /// The stage.
    pub stage_id: StageId,
    /// Resource version carried by the task.
    pub resource_version_id: ResourceVersionId,
    /// Target data plane.
    pub data_plane_id: DataPlaneId,
    /// Rollout mechanism.
    pub mechanism: RolloutMechanism,
    /// Deploy or teardown.
    pub intent: TaskIntent,
    /// Current status.
    pub status: TaskStatus,
    /// Job or operation id reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Failure message, verbatim from the backend.
    #[serde(default)]
    pub message: String,
    /// Creation timestamp.
    pub created_time: DateTime<Utc>,
    /// Last status change.
    pub updated_time: DateTime<Utc>,
}

/// Aggregate status of a publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Tasks are in flight.
    Dispatched,
    /// Every task succeeded.
    Success,
    /// At least one task failed.
    Failure,
    /// Nothing was scheduled.
    Empty,
}

/// Attempt-level aggregate of every task of one dispatch call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishAttempt {
    /// The attempt.
    pub id: AttemptId,
    /// The gateway.
    pub gateway_id: GatewayId,
    /// Why the publish was requested.
    pub source: PublishSource,
    /// The flow that ran.
    pub trigger: TriggerPublishType,
    /// Aggregate status.
    pub status: AttemptStatus,
    /// Number of tasks scheduled.
    pub expected_tasks: u32,
    /// Tasks that reported success.
    #[serde(default)]
    pub succeeded: u32,
    /// Tasks that reported failure.
    #[serde(default)]
    pub failed: u32,
    /// First failure message.
    #[serde(default)]
    pub message: String,
    /// Operator who triggered the publish.
    pub created_by: String,
    /// Creation timestamp.
    pub created_time: DateTime<Utc>,
    /// When the aggregate status became final.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_time: Option<DateTime<Utc>>,
}
