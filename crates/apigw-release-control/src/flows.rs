//! Publish flows.
//!
//! A flow turns the live releases of a gateway into the history rows, tasks
//! and release deletions of one attempt. Flows only plan: every record goes
//! into a [`Transaction`] and nothing runs until the dispatcher commits it.
//!
//! | Trigger          | Data planes | Validation        | Intent     | History rows |
//! |------------------|-------------|-------------------|------------|--------------|
//! | `RollingUpdate`  | active      | per trigger       | deploy     | yes          |
//! | `RevokeDisable`  | active      | liveness bypassed | teardown   | yes          |
//! | `RevokeDelete`   | all         | none              | teardown   | no           |

use std::collections::HashMap;

use apigw_release_core::{
    AttemptId, CoreError, DataPlaneId, HistoryId, StageId, TaskId, TaskIntent,
};
use apigw_release_store::{
    DataPlane, DataPlaneReleaseTask, Gateway, HistoryStatus, HostingType, PublishSource, Release,
    ReleaseHistory, ResourceVersion, RolloutMechanism, Stage, Store, TaskStatus,
    TriggerPublishType, WriteOp,
};
use chrono::{DateTime, Utc};

use crate::backend::DeploymentRequest;
use crate::deprovision::Deprovisioner;
use crate::error::{PublishError, Result};
use crate::events::EventReporter;
use crate::lifecycle::{advance, is_committable};
use crate::resolver::DataPlaneResolver;
use crate::scheduler::ScheduledTask;
use crate::transaction::Transaction;
use crate::types::{Credentials, TargetOutcome};
use crate::validator::{ReleaseValidator, ValidationInput, ValidationMode};

/// The flow a dispatch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishFlow {
    /// Deploy the live resource version to every active data plane.
    RollingUpdate,
    /// Tear the stage down on every active data plane.
    RevokeDisable {
        /// Take the PaaS app offline first.
        deprovision: bool,
    },
    /// Tear the stage down everywhere and drop its release.
    RevokeDelete,
}

impl PublishFlow {
    /// Select the flow for a trigger and the gateway's hosting type.
    #[must_use]
    pub const fn select(trigger: TriggerPublishType, hosting_type: HostingType) -> Self {
        match trigger {
            TriggerPublishType::RollingUpdate => Self::RollingUpdate,
            TriggerPublishType::RevokeDisable => Self::RevokeDisable {
                deprovision: matches!(hosting_type, HostingType::Programmable),
            },
            TriggerPublishType::RevokeDelete => Self::RevokeDelete,
        }
    }

    /// The trigger type this flow implements.
    #[must_use]
    pub const fn trigger(self) -> TriggerPublishType {
        match self {
            Self::RollingUpdate => TriggerPublishType::RollingUpdate,
            Self::RevokeDisable { .. } => TriggerPublishType::RevokeDisable,
            Self::RevokeDelete => TriggerPublishType::RevokeDelete,
        }
    }

    /// What the flow's tasks do to their data plane.
    #[must_use]
    pub const fn intent(self) -> TaskIntent {
        match self {
            Self::RollingUpdate => TaskIntent::Deploy,
            Self::RevokeDisable { .. } | Self::RevokeDelete => TaskIntent::Teardown,
        }
    }

    /// Returns true if the flow reports lifecycle events.
    #[must_use]
    pub const fn reports_events(self) -> bool {
        !matches!(self, Self::RevokeDelete)
    }
}

/// The caller-side parameters of one attempt.
#[derive(Debug, Clone, Copy)]
pub struct FlowContext<'a> {
    /// The attempt.
    pub attempt_id: AttemptId,
    /// Why the publish was requested.
    pub source: PublishSource,
    /// The gateway.
    pub gateway: &'a Gateway,
    /// Operator who triggered the publish.
    pub author: &'a str,
    /// Caller credentials, forwarded to the de-provisioner.
    pub credentials: Option<&'a Credentials>,
    /// Creation time of every row of the attempt.
    pub now: DateTime<Utc>,
}

/// The collaborators a flow reads from and reports to.
pub struct FlowServices<'a, S: Store> {
    /// Configuration and release records.
    pub store: &'a S,
    /// Pre-flight checks.
    pub validator: &'a ReleaseValidator,
    /// Data plane lookup.
    pub resolver: &'a DataPlaneResolver<S>,
    /// Lifecycle events.
    pub reporter: &'a dyn EventReporter,
    /// PaaS de-provisioning.
    pub deprovisioner: &'a dyn Deprovisioner,
}

/// Everything one attempt writes and runs.
#[derive(Debug)]
pub struct FlowPlan {
    /// Records plus the tasks released after commit.
    pub transaction: Transaction<ScheduledTask>,
    /// One outcome per target.
    pub outcomes: Vec<TargetOutcome>,
    /// Rows that received a task, for the task-created events.
    pub dispatched: Vec<ReleaseHistory>,
}

impl FlowPlan {
    fn new() -> Self {
        Self {
            transaction: Transaction::new(),
            outcomes: Vec::new(),
            dispatched: Vec::new(),
        }
    }

    fn record_history(&mut self, history: ReleaseHistory, task_id: Option<TaskId>) {
        debug_assert!(is_committable(history.status));
        self.outcomes.push(TargetOutcome {
            stage_id: history.stage_id,
            data_plane_id: (!history.data_plane_id.is_unresolved()).then_some(history.data_plane_id),
            history_id: Some(history.id),
            task_id,
            status: history.status,
            message: history.message.clone(),
        });
        if task_id.is_some() {
            self.dispatched.push(history.clone());
        }
        self.transaction.record(WriteOp::CreateHistory(history));
    }

    fn schedule(&mut self, record: DataPlaneReleaseTask, request: DeploymentRequest) {
        self.transaction.record(WriteOp::CreateTask(record.clone()));
        self.transaction.defer(ScheduledTask { record, request });
    }

    /// Number of tasks planned.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.transaction.deferred_len()
    }
}

/// The configuration records of one release target.
struct Target {
    stage: Stage,
    version: ResourceVersion,
}

impl PublishFlow {
    /// Plan the attempt for `releases`.
    ///
    /// Failures local to one release or data plane are recorded as
    /// `FAILURE` rows and never abort the plan.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be read.
    pub async fn plan<S: Store>(
        self,
        ctx: &FlowContext<'_>,
        services: &FlowServices<'_, S>,
        releases: &[Release],
    ) -> Result<FlowPlan> {
        match self {
            Self::RevokeDelete => Self::plan_delete(ctx, services, releases),
            Self::RollingUpdate | Self::RevokeDisable { .. } => {
                self.plan_per_target(ctx, services, releases).await
            }
        }
    }

    async fn plan_per_target<S: Store>(
        self,
        ctx: &FlowContext<'_>,
        services: &FlowServices<'_, S>,
        releases: &[Release],
    ) -> Result<FlowPlan> {
        let gateway = ctx.gateway;
        let data_planes = services.resolver.active_data_planes(gateway.id)?;
        let mode = ValidationMode::for_trigger(ctx.source, self.trigger());
        let mut plan = FlowPlan::new();

        for release in releases {
            if data_planes.is_empty() {
                let error = PublishError::Resolution {
                    gateway_id: gateway.id,
                    stage_id: release.stage_id,
                };
                tracing::warn!(
                    gateway_id = %gateway.id,
                    stage_id = %release.stage_id,
                    "No active data plane, recording resolution failure"
                );
                let history =
                    failed_history(ctx, release, DataPlaneId::UNRESOLVED, &error.failure_message())?;
                plan.record_history(history, None);
                continue;
            }

            let target = match load_target(services.store, release) {
                Ok(target) => target,
                Err(PublishError::NotFound(e)) => {
                    tracing::warn!(stage_id = %release.stage_id, error = %e, "Release target is incomplete");
                    for data_plane in &data_planes {
                        let history = failed_history(ctx, release, data_plane.id, &e.to_string())?;
                        plan.record_history(history, None);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            let verdict = services.validator.validate(
                &ValidationInput {
                    gateway,
                    stage: &target.stage,
                    resource_version: &target.version,
                },
                mode,
            );

            let deprovisioned = match (&verdict, self) {
                (Ok(()), Self::RevokeDisable { deprovision: true }) => {
                    Some(deprovision_stage(ctx, services, &target.stage).await)
                }
                _ => None,
            };

            for data_plane in &data_planes {
                let mut history = pending_history(ctx, release, data_plane.id);
                advance(&mut history, HistoryStatus::Validating, "")?;

                if let Err(e) = &verdict {
                    let message = PublishError::from(e.clone()).failure_message();
                    advance(&mut history, HistoryStatus::Failure, &message)?;
                    services.reporter.report_validation_failed(&history, &message);
                    plan.record_history(history, None);
                    continue;
                }
                services.reporter.report_validation_succeeded(&history);

                match &deprovisioned {
                    Some(Err(message)) => {
                        advance(&mut history, HistoryStatus::Failure, message)?;
                        plan.record_history(history, None);
                        continue;
                    }
                    Some(Ok(operation_id)) => {
                        history.deprovision_operation_id = Some(operation_id.clone());
                    }
                    None => {}
                }

                let (record, request) = build_task(
                    ctx,
                    self.intent(),
                    release,
                    &target.stage.name,
                    data_plane,
                    Some(history.id),
                );
                advance(&mut history, HistoryStatus::Dispatched, "")?;
                let task_id = record.id;
                plan.schedule(record, request);
                plan.record_history(history, Some(task_id));
            }
        }

        Ok(plan)
    }

    fn plan_delete<S: Store>(
        ctx: &FlowContext<'_>,
        services: &FlowServices<'_, S>,
        releases: &[Release],
    ) -> Result<FlowPlan> {
        let data_planes = services.resolver.all_data_planes(ctx.gateway.id)?;
        let mut plan = FlowPlan::new();
        let mut stage_names: HashMap<StageId, String> = HashMap::new();

        for release in releases {
            plan.transaction.record(WriteOp::DeleteRelease {
                gateway_id: release.gateway_id,
                stage_id: release.stage_id,
            });

            if data_planes.is_empty() {
                let message = PublishError::Resolution {
                    gateway_id: ctx.gateway.id,
                    stage_id: release.stage_id,
                }
                .failure_message();
                tracing::warn!(stage_id = %release.stage_id, "No data plane to clean up");
                plan.outcomes.push(TargetOutcome {
                    stage_id: release.stage_id,
                    data_plane_id: None,
                    history_id: None,
                    task_id: None,
                    status: HistoryStatus::Failure,
                    message,
                });
                continue;
            }

            // The stage may already be gone when the delete is triggered.
            let stage_name = match stage_names.get(&release.stage_id) {
                Some(name) => name.clone(),
                None => {
                    let name = services
                        .store
                        .get_stage(release.stage_id)?
                        .map(|stage| stage.name)
                        .unwrap_or_default();
                    stage_names.insert(release.stage_id, name.clone());
                    name
                }
            };

            for data_plane in &data_planes {
                let (record, request) =
                    build_task(ctx, TaskIntent::Teardown, release, &stage_name, data_plane, None);
                plan.outcomes.push(TargetOutcome {
                    stage_id: release.stage_id,
                    data_plane_id: Some(data_plane.id),
                    history_id: None,
                    task_id: Some(record.id),
                    status: HistoryStatus::Dispatched,
                    message: String::new(),
                });
                plan.schedule(record, request);
            }
        }

        Ok(plan)
    }
}

fn load_target<S: Store>(store: &S, release: &Release) -> Result<Target> {
    let stage = store
        .get_stage(release.stage_id)?
        .ok_or(CoreError::StageNotFound(release.stage_id))?;
    let version = store
        .get_resource_version(release.resource_version_id)?
        .ok_or(CoreError::ResourceVersionNotFound(release.resource_version_id))?;
    Ok(Target { stage, version })
}

async fn deprovision_stage<S: Store>(
    ctx: &FlowContext<'_>,
    services: &FlowServices<'_, S>,
    stage: &Stage,
) -> std::result::Result<String, String> {
    match services
        .deprovisioner
        .deprovision(ctx.gateway, stage, ctx.credentials)
        .await
    {
        Ok(operation_id) => {
            tracing::info!(
                gateway_id = %ctx.gateway.id,
                stage_id = %stage.id,
                operation_id = %operation_id,
                "Stage de-provisioned"
            );
            Ok(operation_id)
        }
        Err(e) => {
            let error = PublishError::from(e);
            tracing::warn!(
                gateway_id = %ctx.gateway.id,
                stage_id = %stage.id,
                error = %error,
                "De-provisioning failed"
            );
            Err(error.failure_message())
        }
    }
}

fn pending_history(ctx: &FlowContext<'_>, release: &Release, data_plane_id: DataPlaneId) -> ReleaseHistory {
    ReleaseHistory {
        id: HistoryId::derive(&ctx.attempt_id, release.stage_id, data_plane_id),
        attempt_id: ctx.attempt_id,
        gateway_id: release.gateway_id,
        stage_id: release.stage_id,
        resource_version_id: release.resource_version_id,
        data_plane_id,
        source: ctx.source,
        status: HistoryStatus::Pending,
        message: String::new(),
        created_by: ctx.author.to_string(),
        created_time: ctx.now,
        updated_time: ctx.now,
        deprovision_operation_id: None,
    }
}

fn failed_history(
    ctx: &FlowContext<'_>,
    release: &Release,
    data_plane_id: DataPlaneId,
    message: &str,
) -> Result<ReleaseHistory> {
    let mut history = pending_history(ctx, release, data_plane_id);
    advance(&mut history, HistoryStatus::Failure, message)?;
    Ok(history)
}

fn build_task(
    ctx: &FlowContext<'_>,
    intent: TaskIntent,
    release: &Release,
    stage_name: &str,
    data_plane: &DataPlane,
    history_id: Option<HistoryId>,
) -> (DataPlaneReleaseTask, DeploymentRequest) {
    let mechanism = RolloutMechanism::for_target(ctx.gateway.hosting_type, data_plane.kind);
    let id = TaskId::derive(&ctx.attempt_id, release.stage_id, data_plane.id, intent);

    let record = DataPlaneReleaseTask {
        id,
        history_id,
        attempt_id: ctx.attempt_id,
        gateway_id: release.gateway_id,
        stage_id: release.stage_id,
        resource_version_id: release.resource_version_id,
        data_plane_id: data_plane.id,
        mechanism,
        intent,
        status: TaskStatus::Queued,
        job_id: None,
        message: String::new(),
        created_time: ctx.now,
        updated_time: ctx.now,
    };

    let request = DeploymentRequest::for_task(&record, &ctx.gateway.name, stage_name, &data_plane.name);
    (record, request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deprovision::mock::MockDeprovisioner;
    use crate::events::mock::{RecordedEvent, RecordingEventReporter};
    use apigw_release_core::{GatewayId, ResourceVersionId};
    use apigw_release_store::{
        BackendHost, DataPlaneKind, GatewayDataPlaneBinding, GatewayStatus, RocksStore,
        StageBackend, StageStatus,
    };
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn select_by_trigger_and_hosting_type() {
        assert_eq!(
            PublishFlow::select(TriggerPublishType::RollingUpdate, HostingType::Programmable),
            PublishFlow::RollingUpdate
        );
        assert_eq!(
            PublishFlow::select(TriggerPublishType::RevokeDisable, HostingType::Programmable),
            PublishFlow::RevokeDisable { deprovision: true }
        );
        assert_eq!(
            PublishFlow::select(TriggerPublishType::RevokeDisable, HostingType::Micro),
            PublishFlow::RevokeDisable { deprovision: false }
        );
        assert_eq!(
            PublishFlow::select(TriggerPublishType::RevokeDelete, HostingType::Default),
            PublishFlow::RevokeDelete
        );
        assert_eq!(PublishFlow::RevokeDelete.intent(), TaskIntent::Teardown);
        assert!(!PublishFlow::RevokeDelete.reports_events());
    }

    struct Fixture {
        store: Arc<RocksStore>,
        resolver: DataPlaneResolver<RocksStore>,
        validator: ReleaseValidator,
        reporter: RecordingEventReporter,
        deprovisioner: MockDeprovisioner,
        gateway: Gateway,
        _dir: TempDir,
    }

    impl Fixture {
        fn new(hosting_type: HostingType, bindings: &[(u64, bool)]) -> Self {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(RocksStore::open(dir.path()).unwrap());
            let gateway = Gateway {
                id: GatewayId::new(1),
                name: "payments".to_string(),
                status: GatewayStatus::Active,
                hosting_type,
            };
            store.put_gateway(&gateway).unwrap();
            store
                .put_stage(&Stage {
                    id: StageId::new(1),
                    gateway_id: gateway.id,
                    name: "prod".to_string(),
                    status: StageStatus::Active,
                    backends: vec![StageBackend {
                        name: "default".to_string(),
                        hosts: vec![BackendHost::new("http", "orders.internal")],
                    }],
                    vars: BTreeMap::new(),
                })
                .unwrap();
            store
                .put_resource_version(&ResourceVersion {
                    id: ResourceVersionId::new(5),
                    gateway_id: gateway.id,
                    version: "1.0.0".to_string(),
                    schema_version: "2.0".to_string(),
                    resources: Vec::new(),
                    created_at: Utc::now(),
                })
                .unwrap();
            for (id, active) in bindings {
                store
                    .put_data_plane(&DataPlane {
                        id: DataPlaneId::new(*id),
                        name: format!("dp-{id}"),
                        kind: DataPlaneKind::Shared,
                    })
                    .unwrap();
                store
                    .put_binding(&GatewayDataPlaneBinding {
                        gateway_id: gateway.id,
                        data_plane_id: DataPlaneId::new(*id),
                        active: *active,
                    })
                    .unwrap();
            }

            Self {
                resolver: DataPlaneResolver::new(Arc::clone(&store)),
                store,
                validator: ReleaseValidator::new("2.0"),
                reporter: RecordingEventReporter::new(),
                deprovisioner: MockDeprovisioner::new(),
                gateway,
                _dir: dir,
            }
        }

        fn services(&self) -> FlowServices<'_, RocksStore> {
            FlowServices {
                store: self.store.as_ref(),
                validator: &self.validator,
                resolver: &self.resolver,
                reporter: &self.reporter,
                deprovisioner: &self.deprovisioner,
            }
        }

        fn context(&self, source: PublishSource) -> FlowContext<'_> {
            FlowContext {
                attempt_id: AttemptId::from_key(self.gateway.id, "flow-test"),
                source,
                gateway: &self.gateway,
                author: "alice",
                credentials: None,
                now: Utc::now(),
            }
        }
    }

    fn release(stage: u64) -> Release {
        Release {
            gateway_id: GatewayId::new(1),
            stage_id: StageId::new(stage),
            resource_version_id: ResourceVersionId::new(5),
            history_id: None,
            released_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rolling_update_plans_one_task_per_active_data_plane() {
        let fx = Fixture::new(HostingType::Default, &[(1, true), (2, true), (3, false)]);
        let plan = PublishFlow::RollingUpdate
            .plan(&fx.context(PublishSource::ManualPublish), &fx.services(), &[release(1)])
            .await
            .unwrap();

        assert_eq!(plan.task_count(), 2);
        assert_eq!(plan.dispatched.len(), 2);
        assert!(plan
            .outcomes
            .iter()
            .all(|o| o.status == HistoryStatus::Dispatched && o.task_id.is_some()));
        assert_eq!(
            fx.reporter
                .count(|e| matches!(e, RecordedEvent::ValidationSucceeded(_))),
            2
        );
    }

    #[tokio::test]
    async fn no_active_data_plane_records_resolution_failure() {
        let fx = Fixture::new(HostingType::Default, &[(1, false)]);
        let plan = PublishFlow::RollingUpdate
            .plan(&fx.context(PublishSource::ManualPublish), &fx.services(), &[release(1)])
            .await
            .unwrap();

        assert_eq!(plan.task_count(), 0);
        assert_eq!(plan.outcomes.len(), 1);
        assert_eq!(plan.outcomes[0].status, HistoryStatus::Failure);
        assert!(plan.outcomes[0].data_plane_id.is_none());
        assert!(plan.outcomes[0].message.contains("no active data plane"));
    }

    #[tokio::test]
    async fn missing_stage_fails_only_its_release() {
        let fx = Fixture::new(HostingType::Default, &[(1, true)]);
        let plan = PublishFlow::RollingUpdate
            .plan(
                &fx.context(PublishSource::ManualPublish),
                &fx.services(),
                &[release(9), release(1)],
            )
            .await
            .unwrap();

        assert_eq!(plan.outcomes.len(), 2);
        assert_eq!(plan.outcomes[0].status, HistoryStatus::Failure);
        assert_eq!(plan.outcomes[0].message, "stage not found: 9");
        assert_eq!(plan.outcomes[1].status, HistoryStatus::Dispatched);
    }

    #[tokio::test]
    async fn disable_records_operation_id_for_programmable_gateways() {
        let fx = Fixture::new(HostingType::Programmable, &[(1, true), (2, true)]);
        let plan = PublishFlow::select(TriggerPublishType::RevokeDisable, HostingType::Programmable)
            .plan(&fx.context(PublishSource::GatewayDisable), &fx.services(), &[release(1)])
            .await
            .unwrap();

        assert_eq!(fx.deprovisioner.calls(), vec![StageId::new(1)]);
        assert_eq!(plan.task_count(), 2);
        assert!(plan
            .dispatched
            .iter()
            .all(|h| h.deprovision_operation_id.as_deref() == Some("op-1")));
    }

    #[tokio::test]
    async fn failed_deprovision_fails_the_stage() {
        let fx = Fixture::new(HostingType::Programmable, &[(1, true)]);
        fx.deprovisioner.fail_with("paas app is locked");
        let plan = PublishFlow::RevokeDisable { deprovision: true }
            .plan(&fx.context(PublishSource::StageDisable), &fx.services(), &[release(1)])
            .await
            .unwrap();

        assert_eq!(plan.task_count(), 0);
        assert_eq!(plan.outcomes[0].status, HistoryStatus::Failure);
        assert_eq!(plan.outcomes[0].message, "paas app is locked");
    }

    #[tokio::test]
    async fn delete_tears_down_every_binding_without_history() {
        let fx = Fixture::new(HostingType::Default, &[(1, true), (2, true), (3, false)]);
        let plan = PublishFlow::RevokeDelete
            .plan(&fx.context(PublishSource::GatewayDelete), &fx.services(), &[release(1)])
            .await
            .unwrap();

        assert_eq!(plan.task_count(), 3);
        assert!(plan.dispatched.is_empty());
        assert!(plan.outcomes.iter().all(|o| o.history_id.is_none()));
        assert!(fx.reporter.events().is_empty());
        assert!(plan
            .transaction
            .writes()
            .iter()
            .any(|op| matches!(op, WriteOp::DeleteRelease { .. })));
    }
}
