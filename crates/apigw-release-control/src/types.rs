//! Request, result and configuration types for release orchestration.

use std::fmt;

use apigw_release_core::{AttemptId, DataPlaneId, GatewayId, HistoryId, StageId, TaskId};
use apigw_release_store::{HistoryStatus, TriggerPublishType};
use serde::{Deserialize, Serialize};

use crate::scheduler::TaskHandle;

/// Whether a dispatch returns after enqueueing or after every backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Tasks are queued and run by background workers.
    #[default]
    Async,
    /// Tasks run inline; the dispatch returns once every backend call has.
    Sync,
}

/// Caller credentials forwarded to external collaborators.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Bearer token of the operator.
    pub bearer_token: String,
}

impl Credentials {
    /// Wrap a bearer token.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer_token: token.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("bearer_token", &"<redacted>")
            .finish()
    }
}

/// A request to publish or revoke the releases of a gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Trigger source, e.g. `manual-publish`.
    pub source: String,
    /// The gateway.
    pub gateway_id: GatewayId,
    /// Narrow the dispatch to one stage.
    #[serde(default)]
    pub stage_id: Option<StageId>,
    /// Operator recorded on the history rows.
    pub author: String,
    /// Execution mode.
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Credentials for the de-provisioner.
    #[serde(default)]
    pub credentials: Option<Credentials>,
    /// Stable key making a retried dispatch reuse its identifiers.
    #[serde(default)]
    pub attempt_key: Option<String>,
}

impl DispatchRequest {
    /// Create an asynchronous request covering every stage.
    #[must_use]
    pub fn new(source: impl Into<String>, gateway_id: GatewayId, author: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            gateway_id,
            stage_id: None,
            author: author.into(),
            mode: ExecutionMode::Async,
            credentials: None,
            attempt_key: None,
        }
    }

    /// Narrow the request to one stage.
    #[must_use]
    pub const fn with_stage(mut self, stage_id: StageId) -> Self {
        self.stage_id = Some(stage_id);
        self
    }

    /// Set the execution mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Attach caller credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the idempotency key.
    #[must_use]
    pub fn with_attempt_key(mut self, key: impl Into<String>) -> Self {
        self.attempt_key = Some(key.into());
        self
    }

    /// Resolve the attempt identifier of this request.
    #[must_use]
    pub fn attempt_id(&self) -> AttemptId {
        match &self.attempt_key {
            Some(key) => AttemptId::from_key(self.gateway_id, key),
            None => AttemptId::generate(self.gateway_id, &self.source),
        }
    }
}

/// What happened to one `(release, data plane)` pair during a dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetOutcome {
    /// The stage.
    pub stage_id: StageId,
    /// The data plane, `None` when none could be resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_plane_id: Option<DataPlaneId>,
    /// The history row, `None` for delete-flow teardowns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_id: Option<HistoryId>,
    /// The scheduled task, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// Status at the end of the dispatch call.
    pub status: HistoryStatus,
    /// Failure message.
    #[serde(default)]
    pub message: String,
}

impl TargetOutcome {
    /// Returns true if a task was scheduled for the pair.
    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        self.task_id.is_some()
    }
}

/// The result of a dispatch that scheduled at least one task.
#[derive(Debug)]
pub struct DispatchReport {
    /// The attempt.
    pub attempt_id: AttemptId,
    /// The flow that ran.
    pub trigger: TriggerPublishType,
    /// One outcome per target.
    pub outcomes: Vec<TargetOutcome>,
    /// Completion handle of the scheduled task group.
    pub handle: TaskHandle,
}

/// The result of a dispatch call.
#[derive(Debug)]
pub enum DispatchResult {
    /// The gateway has no release in scope.
    NothingToDo,
    /// Rows were recorded but no task could be scheduled.
    NotDispatched {
        /// The attempt.
        attempt_id: AttemptId,
        /// Why nothing was scheduled.
        reason: String,
        /// One outcome per target.
        outcomes: Vec<TargetOutcome>,
    },
    /// At least one task was scheduled.
    Dispatched(DispatchReport),
}

impl DispatchResult {
    /// Per-target outcomes, empty for `NothingToDo`.
    #[must_use]
    pub fn outcomes(&self) -> &[TargetOutcome] {
        match self {
            Self::NothingToDo => &[],
            Self::NotDispatched { outcomes, .. } => outcomes,
            Self::Dispatched(report) => &report.outcomes,
        }
    }

    /// The attempt, `None` for `NothingToDo`.
    #[must_use]
    pub const fn attempt_id(&self) -> Option<AttemptId> {
        match self {
            Self::NothingToDo => None,
            Self::NotDispatched { attempt_id, .. } => Some(*attempt_id),
            Self::Dispatched(report) => Some(report.attempt_id),
        }
    }

    /// A serializable view of the result.
    #[must_use]
    pub fn summary(&self) -> DispatchSummary {
        let state = match self {
            Self::NothingToDo => "nothing_to_do",
            Self::NotDispatched { .. } => "not_dispatched",
            Self::Dispatched(_) => "dispatched",
        };
        DispatchSummary {
            state,
            attempt_id: self.attempt_id(),
            reason: match self {
                Self::NotDispatched { reason, .. } => Some(reason.clone()),
                _ => None,
            },
            outcomes: self.outcomes().to_vec(),
        }
    }
}

/// Serializable summary of a [`DispatchResult`].
#[derive(Debug, Clone, Serialize)]
pub struct DispatchSummary {
    /// `nothing_to_do`, `not_dispatched` or `dispatched`.
    pub state: &'static str,
    /// The attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<AttemptId>,
    /// Why nothing was scheduled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// One outcome per target.
    pub outcomes: Vec<TargetOutcome>,
}

/// Configuration for the release publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Address the internal service listens on.
    #[serde(default = "PublisherConfig::default_listen_addr")]
    pub listen_addr: String,
    /// `RocksDB` data directory.
    #[serde(default = "PublisherConfig::default_data_dir")]
    pub data_dir: String,
    /// Base URL of the shared registry push service.
    #[serde(default)]
    pub registry_push_url: Option<String>,
    /// Base URL of the chart rollout service.
    #[serde(default)]
    pub chart_rollout_url: Option<String>,
    /// Base URL of the PaaS de-provisioning service.
    #[serde(default)]
    pub paas_deprovision_url: Option<String>,
    /// Timeout of one backend call (seconds).
    #[serde(default = "PublisherConfig::default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
    /// Schema version resource versions must be written with.
    #[serde(default = "PublisherConfig::default_schema_version")]
    pub current_schema_version: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            data_dir: Self::default_data_dir(),
            registry_push_url: None,
            chart_rollout_url: None,
            paas_deprovision_url: None,
            backend_timeout_secs: Self::default_backend_timeout_secs(),
            current_schema_version: Self::default_schema_version(),
        }
    }
}

impl PublisherConfig {
    fn default_listen_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    fn default_data_dir() -> String {
        "/data".to_string()
    }

    const fn default_backend_timeout_secs() -> u64 {
        30
    }

    /// The schema version current data planes understand.
    #[must_use]
    pub fn default_schema_version() -> String {
        "2.0".to_string()
    }

    /// Read the configuration from the environment.
    ///
    /// Unset or empty variables keep their defaults; an unparsable
    /// `BACKEND_TIMEOUT_SECS` is ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|value| !value.is_empty());
        let defaults = Self::default();

        let backend_timeout_secs = match var("BACKEND_TIMEOUT_SECS") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "Invalid BACKEND_TIMEOUT_SECS, using default");
                defaults.backend_timeout_secs
            }),
            None => defaults.backend_timeout_secs,
        };

        Self {
            listen_addr: var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: var("DATA_DIR").unwrap_or(defaults.data_dir),
            registry_push_url: var("REGISTRY_PUSH_URL"),
            chart_rollout_url: var("CHART_ROLLOUT_URL"),
            paas_deprovision_url: var("PAAS_DEPROVISION_URL"),
            backend_timeout_secs,
            current_schema_version: var("CURRENT_SCHEMA_VERSION")
                .unwrap_or(defaults.current_schema_version),
        }
    }

    /// Backend call timeout.
    #[must_use]
    pub const fn backend_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.backend_timeout_secs)
    }
}
