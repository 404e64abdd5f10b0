//! PaaS de-provisioning for programmable gateways.
//!
//! Programmable gateways also run code on an external PaaS. Disabling one
//! stage of such a gateway takes the PaaS app offline before the data plane
//! teardown is dispatched.

use std::time::Duration;

use apigw_release_store::{Gateway, Stage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::{build_client, rejection};
use crate::error::BackendError;
use crate::types::Credentials;

/// Takes the PaaS app of a programmable gateway stage offline.
#[async_trait]
pub trait Deprovisioner: Send + Sync {
    /// De-provision one stage and return the PaaS operation id.
    ///
    /// # Errors
    ///
    /// Returns an error if the PaaS rejects the request or cannot be reached.
    async fn deprovision(
        &self,
        gateway: &Gateway,
        stage: &Stage,
        credentials: Option<&Credentials>,
    ) -> Result<String, BackendError>;
}

/// HTTP client of the PaaS de-provisioning API.
#[derive(Debug, Clone)]
pub struct HttpDeprovisioner {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct OfflineRequest<'a> {
    stage: &'a str,
}

#[derive(Debug, Deserialize)]
struct OfflineResponse {
    operation_id: String,
}

impl HttpDeprovisioner {
    /// Create a client for the PaaS at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl Deprovisioner for HttpDeprovisioner {
    async fn deprovision(
        &self,
        gateway: &Gateway,
        stage: &Stage,
        credentials: Option<&Credentials>,
    ) -> Result<String, BackendError> {
        let url = format!("{}/v1/apps/{}/offline", self.base_url, gateway.name);

        let mut request = self
            .client
            .post(&url)
            .json(&OfflineRequest { stage: &stage.name });
        if let Some(credentials) = credentials {
            request = request.bearer_auth(&credentials.bearer_token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(rejection(response, "paas").await);
        }

        let body: OfflineResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("failed to parse paas response: {e}")))?;

        tracing::info!(
            gateway = %gateway.name,
            stage = %stage.name,
            operation_id = %body.operation_id,
            "De-provisioned programmable gateway stage"
        );
        Ok(body.operation_id)
    }
}

/// A de-provisioner used when no PaaS is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopDeprovisioner;

#[async_trait]
impl Deprovisioner for NoopDeprovisioner {
    async fn deprovision(
        &self,
        gateway: &Gateway,
        stage: &Stage,
        _credentials: Option<&Credentials>,
    ) -> Result<String, BackendError> {
        tracing::warn!(
            gateway = %gateway.name,
            stage = %stage.name,
            "NoopDeprovisioner: deprovision called but no PaaS configured"
        );
        Ok(format!("noop-{}-{}", gateway.id, stage.id))
    }
}

/// An in-memory de-provisioner for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use apigw_release_core::StageId;
    use parking_lot::Mutex;

    /// Records every stage it was asked to take offline.
    #[derive(Default)]
    pub struct MockDeprovisioner {
        calls: Mutex<Vec<StageId>>,
        failure: Mutex<Option<String>>,
    }

    impl MockDeprovisioner {
        /// Create a new mock de-provisioner.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Reject every call with `message`.
        pub fn fail_with(&self, message: impl Into<String>) {
            *self.failure.lock() = Some(message.into());
        }

        /// Stages de-provisioned so far.
        #[must_use]
        pub fn calls(&self) -> Vec<StageId> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Deprovisioner for MockDeprovisioner {
        async fn deprovision(
            &self,
            _gateway: &Gateway,
            stage: &Stage,
            _credentials: Option<&Credentials>,
        ) -> Result<String, BackendError> {
            self.calls.lock().push(stage.id);
            match self.failure.lock().clone() {
                Some(message) => Err(BackendError::Rejected(message)),
                None => Ok(format!("op-{}", stage.id)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigw_release_core::{GatewayId, StageId};
    use apigw_release_store::{GatewayStatus, HostingType, StageStatus};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn programmable_gateway() -> Gateway {
        Gateway {
            id: GatewayId::new(1),
            name: "fn-gateway".to_string(),
            status: GatewayStatus::Active,
            hosting_type: HostingType::Programmable,
        }
    }

    fn stage() -> Stage {
        Stage {
            id: StageId::new(2),
            gateway_id: GatewayId::new(1),
            name: "prod".to_string(),
            status: StageStatus::Active,
            backends: Vec::new(),
            vars: std::collections::BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn http_deprovision_returns_operation_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/apps/fn-gateway/offline"))
            .and(header("authorization", "Bearer op-token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"operation_id": "paas-77"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let deprovisioner = HttpDeprovisioner::new(server.uri(), Duration::from_secs(5)).unwrap();
        let op = deprovisioner
            .deprovision(
                &programmable_gateway(),
                &stage(),
                Some(&Credentials::bearer("op-token")),
            )
            .await
            .unwrap();
        assert_eq!(op, "paas-77");
    }

    #[tokio::test]
    async fn http_deprovision_failure_is_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_json(serde_json::json!({"error": "app fn-gateway is locked"})),
            )
            .mount(&server)
            .await;

        let deprovisioner = HttpDeprovisioner::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = deprovisioner
            .deprovision(&programmable_gateway(), &stage(), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "app fn-gateway is locked");
    }
}
