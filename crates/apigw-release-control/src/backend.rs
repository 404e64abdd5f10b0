//! Deployment backends.
//!
//! A [`DeploymentBackend`] pushes the configuration of one stage to one data
//! plane, or removes it. Shared data planes are fed through the registry push
//! service and dedicated ones through the chart rollout service; see
//! [`RolloutMechanism`].

use std::sync::Arc;
use std::time::Duration;

use apigw_release_core::{
    AttemptId, DataPlaneId, GatewayId, ResourceVersionId, StageId, TaskId, TaskIntent,
};
use apigw_release_store::{DataPlaneReleaseTask, RolloutMechanism};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Everything a backend needs to roll one task out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// The task being executed.
    pub task_id: TaskId,
    /// The attempt the task belongs to.
    pub attempt_id: AttemptId,
    /// The gateway.
    pub gateway_id: GatewayId,
    /// Gateway name.
    pub gateway_name: String,
    /// The stage.
    pub stage_id: StageId,
    /// Stage name.
    pub stage_name: String,
    /// Resource version to install, or the one being removed.
    pub resource_version_id: ResourceVersionId,
    /// Target data plane.
    pub data_plane_id: DataPlaneId,
    /// Data plane name.
    pub data_plane_name: String,
    /// Rollout mechanism.
    pub mechanism: RolloutMechanism,
    /// Deploy or teardown.
    pub intent: TaskIntent,
}

impl DeploymentRequest {
    /// The request executing a stored task.
    #[must_use]
    pub fn for_task(
        task: &DataPlaneReleaseTask,
        gateway_name: &str,
        stage_name: &str,
        data_plane_name: &str,
    ) -> Self {
        Self {
            task_id: task.id,
            attempt_id: task.attempt_id,
            gateway_id: task.gateway_id,
            gateway_name: gateway_name.to_string(),
            stage_id: task.stage_id,
            stage_name: stage_name.to_string(),
            resource_version_id: task.resource_version_id,
            data_plane_id: task.data_plane_id,
            data_plane_name: data_plane_name.to_string(),
            mechanism: task.mechanism,
            intent: task.intent,
        }
    }
}

/// State of a backend job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// The job finished successfully.
    Completed,
    /// The job continues; completion is reported through the task callback.
    Running,
}

/// A backend's answer to an accepted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReceipt {
    /// Job identifier assigned by the backend.
    pub job_id: String,
    /// Job state.
    pub state: JobState,
}

impl JobReceipt {
    /// A receipt for a job that already finished.
    #[must_use]
    pub fn completed(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: JobState::Completed,
        }
    }
}

/// Pushes stage configuration to a data plane.
///
/// Retries are the backend's concern; the scheduler calls each method once
/// per task.
#[async_trait]
pub trait DeploymentBackend: Send + Sync {
    /// Install or update the stage configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the job or cannot be reached.
    async fn deploy(&self, request: &DeploymentRequest) -> Result<JobReceipt, BackendError>;

    /// Remove the stage configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the job or cannot be reached.
    async fn teardown(&self, request: &DeploymentRequest) -> Result<JobReceipt, BackendError>;
}

/// The backend of each rollout mechanism.
#[derive(Clone)]
pub struct Backends {
    registry: Arc<dyn DeploymentBackend>,
    chart: Arc<dyn DeploymentBackend>,
}

impl Backends {
    /// Create a backend set.
    #[must_use]
    pub fn new(registry: Arc<dyn DeploymentBackend>, chart: Arc<dyn DeploymentBackend>) -> Self {
        Self { registry, chart }
    }

    /// Use the same backend for every mechanism.
    #[must_use]
    pub fn uniform(backend: Arc<dyn DeploymentBackend>) -> Self {
        Self {
            registry: Arc::clone(&backend),
            chart: backend,
        }
    }

    /// Select the backend of a mechanism.
    #[must_use]
    pub fn for_mechanism(&self, mechanism: RolloutMechanism) -> &dyn DeploymentBackend {
        match mechanism {
            RolloutMechanism::SharedRegistryPush => self.registry.as_ref(),
            RolloutMechanism::DedicatedChartRollout => self.chart.as_ref(),
        }
    }

    /// Run the request against the backend its mechanism and intent select.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn execute(&self, request: &DeploymentRequest) -> Result<JobReceipt, BackendError> {
        let backend = self.for_mechanism(request.mechanism);
        match request.intent {
            TaskIntent::Deploy => backend.deploy(request).await,
            TaskIntent::Teardown => backend.teardown(request).await,
        }
    }
}

/// Error response from a backend service.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Build the HTTP client shared by the backend implementations.
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| BackendError::Transport(format!("failed to create HTTP client: {e}")))
}

/// Turn a non-success response into `BackendError::Rejected`, keeping the
/// backend's own message.
pub(crate) async fn rejection(response: reqwest::Response, service: &str) -> BackendError {
    let status = response.status();
    let error = response
        .json::<ErrorResponse>()
        .await
        .map(|e| e.error)
        .unwrap_or_else(|_| format!("{service} returned status {status}"));

    tracing::error!(service, status = %status, error = %error, "Backend rejected request");
    BackendError::Rejected(error)
}

async fn read_receipt(
    response: reqwest::Response,
    service: &str,
) -> Result<JobReceipt, BackendError> {
    if response.status().is_success() {
        response
            .json::<JobReceipt>()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("failed to parse {service} response: {e}")))
    } else {
        Err(rejection(response, service).await)
    }
}

// =============================================================================
// Shared registry push
// =============================================================================

/// HTTP client of the registry push service feeding shared data planes.
#[derive(Debug, Clone)]
pub struct RegistryPushBackend {
    client: reqwest::Client,
    base_url: String,
}

/// Request body of a registry push.
#[derive(Debug, Serialize)]
struct RegistryPushBody<'a> {
    task_id: &'a TaskId,
    attempt_id: &'a AttemptId,
    gateway_name: &'a str,
    stage_name: &'a str,
    resource_version_id: ResourceVersionId,
    data_plane: &'a str,
}

impl<'a> From<&'a DeploymentRequest> for RegistryPushBody<'a> {
    fn from(request: &'a DeploymentRequest) -> Self {
        Self {
            task_id: &request.task_id,
            attempt_id: &request.attempt_id,
            gateway_name: &request.gateway_name,
            stage_name: &request.stage_name,
            resource_version_id: request.resource_version_id,
            data_plane: &request.data_plane_name,
        }
    }
}

impl RegistryPushBackend {
    /// Create a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        Ok(Self::with_client(build_client(timeout)?, base_url))
    }

    /// Create a client with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Get the base URL of the service.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn releases_url(&self, request: &DeploymentRequest) -> String {
        format!(
            "{}/v1/gateways/{}/stages/{}/releases",
            self.base_url, request.gateway_id, request.stage_id
        )
    }
}

#[async_trait]
impl DeploymentBackend for RegistryPushBackend {
    async fn deploy(&self, request: &DeploymentRequest) -> Result<JobReceipt, BackendError> {
        let response = self
            .client
            .post(self.releases_url(request))
            .json(&RegistryPushBody::from(request))
            .send()
            .await?;

        let receipt = read_receipt(response, "registry").await?;
        tracing::debug!(task_id = %request.task_id, job_id = %receipt.job_id, "Pushed release to registry");
        Ok(receipt)
    }

    async fn teardown(&self, request: &DeploymentRequest) -> Result<JobReceipt, BackendError> {
        let response = self
            .client
            .delete(self.releases_url(request))
            .json(&RegistryPushBody::from(request))
            .send()
            .await?;

        let receipt = read_receipt(response, "registry").await?;
        tracing::debug!(task_id = %request.task_id, job_id = %receipt.job_id, "Removed release from registry");
        Ok(receipt)
    }
}

// =============================================================================
// Dedicated chart rollout
// =============================================================================

/// HTTP client of the chart rollout service managing dedicated data planes.
#[derive(Debug, Clone)]
pub struct ChartRolloutBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum RolloutAction {
    Install,
    Uninstall,
}

/// Request body of a chart rollout.
#[derive(Debug, Serialize)]
struct RolloutBody<'a> {
    action: RolloutAction,
    task_id: &'a TaskId,
    gateway_name: &'a str,
    stage_name: &'a str,
    resource_version_id: ResourceVersionId,
}

impl ChartRolloutBackend {
    /// Create a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        Ok(Self::with_client(build_client(timeout)?, base_url))
    }

    /// Create a client with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Get the base URL of the service.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn rollout(
        &self,
        request: &DeploymentRequest,
        action: RolloutAction,
    ) -> Result<JobReceipt, BackendError> {
        let url = format!(
            "{}/v1/data-planes/{}/rollouts",
            self.base_url, request.data_plane_id
        );

        let body = RolloutBody {
            action,
            task_id: &request.task_id,
            gateway_name: &request.gateway_name,
            stage_name: &request.stage_name,
            resource_version_id: request.resource_version_id,
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let receipt = read_receipt(response, "chart rollout").await?;

        tracing::debug!(
            task_id = %request.task_id,
            data_plane_id = %request.data_plane_id,
            job_id = %receipt.job_id,
            action = ?action,
            "Submitted chart rollout"
        );
        Ok(receipt)
    }
}

#[async_trait]
impl DeploymentBackend for ChartRolloutBackend {
    async fn deploy(&self, request: &DeploymentRequest) -> Result<JobReceipt, BackendError> {
        self.rollout(request, RolloutAction::Install).await
    }

    async fn teardown(&self, request: &DeploymentRequest) -> Result<JobReceipt, BackendError> {
        self.rollout(request, RolloutAction::Uninstall).await
    }
}

// =============================================================================
// No-op
// =============================================================================

/// A backend used when no rollout service is configured.
///
/// Every job completes immediately.
#[derive(Debug, Clone, Default)]
pub struct NoopBackend;

impl NoopBackend {
    /// Create a new no-op backend.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeploymentBackend for NoopBackend {
    async fn deploy(&self, request: &DeploymentRequest) -> Result<JobReceipt, BackendError> {
        tracing::warn!(
            task_id = %request.task_id,
            "NoopBackend: deploy called but no rollout service configured"
        );
        Ok(JobReceipt::completed(format!("noop-{}", request.task_id)))
    }

    async fn teardown(&self, request: &DeploymentRequest) -> Result<JobReceipt, BackendError> {
        tracing::warn!(
            task_id = %request.task_id,
            "NoopBackend: teardown called but no rollout service configured"
        );
        Ok(JobReceipt::completed(format!("noop-{}", request.task_id)))
    }
}

/// A scriptable in-memory backend for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// A mock backend recording every call.
    ///
    /// Calls succeed unless a failure, a delay or a running answer was
    /// scripted for the target data plane.
    #[derive(Default)]
    pub struct MockBackend {
        calls: Mutex<Vec<(TaskIntent, DataPlaneId)>>,
        failures: Mutex<HashMap<DataPlaneId, String>>,
        delays: Mutex<HashMap<DataPlaneId, Duration>>,
        running: Mutex<Vec<DataPlaneId>>,
    }

    impl MockBackend {
        /// Create a new mock backend.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Reject every job for a data plane with `message`.
        pub fn fail_data_plane(&self, data_plane_id: DataPlaneId, message: impl Into<String>) {
            self.failures.lock().insert(data_plane_id, message.into());
        }

        /// Delay every answer for a data plane.
        pub fn delay_data_plane(&self, data_plane_id: DataPlaneId, delay: Duration) {
            self.delays.lock().insert(data_plane_id, delay);
        }

        /// Answer jobs for a data plane with `JobState::Running`.
        pub fn run_in_background(&self, data_plane_id: DataPlaneId) {
            self.running.lock().push(data_plane_id);
        }

        /// Every call received, in order.
        #[must_use]
        pub fn calls(&self) -> Vec<(TaskIntent, DataPlaneId)> {
            self.calls.lock().clone()
        }

        /// Number of calls with the given intent.
        #[must_use]
        pub fn call_count(&self, intent: TaskIntent) -> usize {
            self.calls.lock().iter().filter(|(i, _)| *i == intent).count()
        }

        async fn answer(&self, request: &DeploymentRequest) -> Result<JobReceipt, BackendError> {
            self.calls
                .lock()
                .push((request.intent, request.data_plane_id));

            let delay = self.delays.lock().get(&request.data_plane_id).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if let Some(message) = self.failures.lock().get(&request.data_plane_id) {
                return Err(BackendError::Rejected(message.clone()));
            }

            let state = if self.running.lock().contains(&request.data_plane_id) {
                JobState::Running
            } else {
                JobState::Completed
            };

            Ok(JobReceipt {
                job_id: format!("job-{}", request.data_plane_id),
                state,
            })
        }
    }

    #[async_trait]
    impl DeploymentBackend for MockBackend {
        async fn deploy(&self, request: &DeploymentRequest) -> Result<JobReceipt, BackendError> {
            self.answer(request).await
        }

        async fn teardown(&self, request: &DeploymentRequest) -> Result<JobReceipt, BackendError> {
            self.answer(request).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_request(mechanism: RolloutMechanism, intent: TaskIntent) -> DeploymentRequest {
        let attempt_id = AttemptId::from_key(GatewayId::new(1), "backend");
        DeploymentRequest {
            task_id: TaskId::derive(&attempt_id, StageId::new(2), DataPlaneId::new(3), intent),
            attempt_id,
            gateway_id: GatewayId::new(1),
            gateway_name: "payments".to_string(),
            stage_id: StageId::new(2),
            stage_name: "prod".to_string(),
            resource_version_id: ResourceVersionId::new(5),
            data_plane_id: DataPlaneId::new(3),
            data_plane_name: "bj-1".to_string(),
            mechanism,
            intent,
        }
    }

    #[tokio::test]
    async fn registry_push_deploy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/gateways/1/stages/2/releases"))
            .and(body_partial_json(serde_json::json!({
                "stage_name": "prod",
                "resource_version_id": 5
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"job_id": "r-1", "state": "completed"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backend = RegistryPushBackend::new(server.uri(), Duration::from_secs(5)).unwrap();
        let receipt = backend
            .deploy(&test_request(RolloutMechanism::SharedRegistryPush, TaskIntent::Deploy))
            .await
            .unwrap();
        assert_eq!(receipt, JobReceipt::completed("r-1"));
    }

    #[tokio::test]
    async fn registry_push_teardown_uses_delete() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/gateways/1/stages/2/releases"))
            .respond_with(
                ResponseTemplate::new(202)
                    .set_body_json(serde_json::json!({"job_id": "r-2", "state": "running"})),
            )
            .mount(&server)
            .await;

        let backend = RegistryPushBackend::new(server.uri(), Duration::from_secs(5)).unwrap();
        let receipt = backend
            .teardown(&test_request(RolloutMechanism::SharedRegistryPush, TaskIntent::Teardown))
            .await
            .unwrap();
        assert_eq!(receipt.state, JobState::Running);
    }

    #[tokio::test]
    async fn chart_rollout_sends_action() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/data-planes/3/rollouts"))
            .and(body_partial_json(serde_json::json!({"action": "uninstall"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"job_id": "c-9", "state": "completed"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backends = Backends::new(
            Arc::new(NoopBackend::new()),
            Arc::new(ChartRolloutBackend::new(server.uri(), Duration::from_secs(5)).unwrap()),
        );
        let receipt = backends
            .execute(&test_request(
                RolloutMechanism::DedicatedChartRollout,
                TaskIntent::Teardown,
            ))
            .await
            .unwrap();
        assert_eq!(receipt.job_id, "c-9");
    }

    #[tokio::test]
    async fn rejection_keeps_backend_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(serde_json::json!({"error": "chart values invalid: replicas"})),
            )
            .mount(&server)
            .await;

        let backend = ChartRolloutBackend::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = backend
            .deploy(&test_request(RolloutMechanism::DedicatedChartRollout, TaskIntent::Deploy))
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::Rejected("chart values invalid: replicas".to_string()));
    }

    #[tokio::test]
    async fn rejection_without_body_names_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let backend = RegistryPushBackend::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = backend
            .deploy(&test_request(RolloutMechanism::SharedRegistryPush, TaskIntent::Deploy))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn noop_backend_completes() {
        let receipt = NoopBackend::new()
            .deploy(&test_request(RolloutMechanism::SharedRegistryPush, TaskIntent::Deploy))
            .await
            .unwrap();
        assert_eq!(receipt.state, JobState::Completed);
    }

    #[tokio::test]
    async fn mock_backend_scripts_failures() {
        let backend = mock::MockBackend::new();
        backend.fail_data_plane(DataPlaneId::new(3), "disk full");

        let err = backend
            .deploy(&test_request(RolloutMechanism::SharedRegistryPush, TaskIntent::Deploy))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(backend.call_count(TaskIntent::Deploy), 1);
    }
}
