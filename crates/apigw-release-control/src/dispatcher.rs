//! Publish trigger dispatch.
//!
//! [`Dispatcher::trigger`] is the entry point of the orchestration core. It
//! maps the caller's source to a flow, plans the attempt, commits every
//! record in one batch and only then hands the tasks to the scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use apigw_release_core::{CoreError, StageId};
use apigw_release_store::{
    AttemptStatus, DataPlaneReleaseTask, Gateway, HistoryStatus, PublishAttempt, PublishSource,
    ReleaseHistory, Store, TaskStatus, TriggerPublishType, WriteOp,
};
use chrono::Utc;

use crate::backend::{
    Backends, ChartRolloutBackend, DeploymentBackend, DeploymentRequest, NoopBackend,
    RegistryPushBackend,
};
use crate::deprovision::{Deprovisioner, HttpDeprovisioner, NoopDeprovisioner};
use crate::error::{PublishError, Result};
use crate::events::{EventReporter, NoopEventReporter, TracingEventReporter};
use crate::flows::{FlowContext, FlowServices, PublishFlow};
use crate::recorder::ReleaseRecorder;
use crate::resolver::DataPlaneResolver;
use crate::scheduler::{RolloutTaskScheduler, ScheduledTask, TaskGroup};
use crate::types::{
    DispatchReport, DispatchRequest, DispatchResult, ExecutionMode, PublisherConfig, TargetOutcome,
};
use crate::validator::ReleaseValidator;

/// The trigger type a publish source resolves to.
#[must_use]
pub const fn trigger_type_for(source: PublishSource) -> TriggerPublishType {
    match source {
        PublishSource::ManualPublish
        | PublishSource::CliSync
        | PublishSource::GatewayEnable
        | PublishSource::StageUpdate
        | PublishSource::BackendUpdate
        | PublishSource::PluginBind
        | PublishSource::PluginUnbind => TriggerPublishType::RollingUpdate,
        PublishSource::GatewayDisable | PublishSource::StageDisable => {
            TriggerPublishType::RevokeDisable
        }
        PublishSource::GatewayDelete | PublishSource::StageDelete => {
            TriggerPublishType::RevokeDelete
        }
    }
}

/// Parse a source string and resolve its trigger type.
///
/// # Errors
///
/// Returns `PublishError::Configuration` for an unknown source.
pub fn classify(source: &str) -> Result<(PublishSource, TriggerPublishType)> {
    let source: PublishSource = source
        .parse()
        .map_err(|e: apigw_release_store::UnknownSource| PublishError::Configuration(e.to_string()))?;
    Ok((source, trigger_type_for(source)))
}

/// Maps publish triggers to flows and runs them.
pub struct Dispatcher<S: Store + 'static> {
    store: Arc<S>,
    scheduler: Arc<RolloutTaskScheduler<S>>,
    validator: ReleaseValidator,
    resolver: DataPlaneResolver<S>,
    reporter: Arc<dyn EventReporter>,
    deprovisioner: Arc<dyn Deprovisioner>,
}

impl<S: Store + 'static> Dispatcher<S> {
    /// Create a dispatcher with tracing events and no PaaS de-provisioning.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        scheduler: Arc<RolloutTaskScheduler<S>>,
        validator: ReleaseValidator,
    ) -> Self {
        Self {
            resolver: DataPlaneResolver::new(Arc::clone(&store)),
            store,
            scheduler,
            validator,
            reporter: Arc::new(TracingEventReporter),
            deprovisioner: Arc::new(NoopDeprovisioner),
        }
    }

    /// Build a dispatcher, its scheduler and its HTTP collaborators from
    /// configuration.
    ///
    /// Unset service URLs fall back to the no-op implementations.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be created.
    pub fn from_config(store: Arc<S>, config: &PublisherConfig) -> Result<Self> {
        let timeout = config.backend_timeout();

        let registry: Arc<dyn DeploymentBackend> = match &config.registry_push_url {
            Some(url) => {
                tracing::info!(url = %url, "Using registry push backend");
                Arc::new(RegistryPushBackend::new(url, timeout)?)
            }
            None => {
                tracing::warn!("REGISTRY_PUSH_URL not set, using NoopBackend for shared data planes");
                Arc::new(NoopBackend::new())
            }
        };

        let chart: Arc<dyn DeploymentBackend> = match &config.chart_rollout_url {
            Some(url) => {
                tracing::info!(url = %url, "Using chart rollout backend");
                Arc::new(ChartRolloutBackend::new(url, timeout)?)
            }
            None => {
                tracing::warn!("CHART_ROLLOUT_URL not set, using NoopBackend for dedicated data planes");
                Arc::new(NoopBackend::new())
            }
        };

        let deprovisioner: Arc<dyn Deprovisioner> = match &config.paas_deprovision_url {
            Some(url) => {
                tracing::info!(url = %url, "Using PaaS de-provisioner");
                Arc::new(HttpDeprovisioner::new(url, timeout)?)
            }
            None => {
                tracing::warn!("PAAS_DEPROVISION_URL not set, using NoopDeprovisioner");
                Arc::new(NoopDeprovisioner)
            }
        };

        let reporter: Arc<dyn EventReporter> = Arc::new(TracingEventReporter);
        let fallback = Arc::new(ReleaseRecorder::new(Arc::clone(&store), Arc::clone(&reporter)));
        let scheduler = RolloutTaskScheduler::new(Arc::clone(&store), Backends::new(registry, chart))
            .with_fallback_handler(fallback);

        Ok(Self::new(
            store,
            Arc::new(scheduler),
            ReleaseValidator::new(config.current_schema_version.clone()),
        )
        .with_reporter(reporter)
        .with_deprovisioner(deprovisioner))
    }

    /// Use a different event reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn EventReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Use a different de-provisioner.
    #[must_use]
    pub fn with_deprovisioner(mut self, deprovisioner: Arc<dyn Deprovisioner>) -> Self {
        self.deprovisioner = deprovisioner;
        self
    }

    /// The scheduler running this dispatcher's tasks.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<RolloutTaskScheduler<S>> {
        &self.scheduler
    }

    /// The store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The completion handler of a flow's tasks.
    #[must_use]
    pub fn recorder_for(&self, flow: PublishFlow) -> Arc<ReleaseRecorder<S>> {
        Arc::new(ReleaseRecorder::new(
            Arc::clone(&self.store),
            self.reporter_for(flow),
        ))
    }

    fn reporter_for(&self, flow: PublishFlow) -> Arc<dyn EventReporter> {
        if flow.reports_events() {
            Arc::clone(&self.reporter)
        } else {
            Arc::new(NoopEventReporter)
        }
    }

    /// Run one publish trigger.
    ///
    /// Failures local to one `(release, data plane)` pair are recorded as
    /// `FAILURE` rows and reported in the outcomes; they do not fail the
    /// call.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Configuration` for an unknown source, before
    /// anything is written, `PublishError::NotFound` for an unknown gateway,
    /// and store errors.
    pub async fn trigger(&self, request: DispatchRequest) -> Result<DispatchResult> {
        let (source, trigger) = classify(&request.source)?;

        let gateway = self
            .store
            .get_gateway(request.gateway_id)?
            .ok_or(CoreError::GatewayNotFound(request.gateway_id))?;

        let attempt_id = request.attempt_id();
        if let Some(attempt) = self.store.get_attempt(&attempt_id)? {
            return self.resume(&attempt, &gateway, source, request.mode).await;
        }

        let releases = self.store.list_releases(gateway.id, request.stage_id)?;
        if releases.is_empty() {
            tracing::info!(
                gateway_id = %gateway.id,
                stage_id = ?request.stage_id,
                source = %source,
                "No release in scope, nothing to do"
            );
            return Ok(DispatchResult::NothingToDo);
        }

        let flow = PublishFlow::select(trigger, gateway.hosting_type);
        let now = Utc::now();

        tracing::info!(
            gateway_id = %gateway.id,
            attempt_id = %attempt_id,
            source = %source,
            flow = ?flow,
            releases = releases.len(),
            mode = ?request.mode,
            "Dispatching publish"
        );

        let reporter = self.reporter_for(flow);
        let ctx = FlowContext {
            attempt_id,
            source,
            gateway: &gateway,
            author: &request.author,
            credentials: request.credentials.as_ref(),
            now,
        };
        let services = FlowServices {
            store: self.store.as_ref(),
            validator: &self.validator,
            resolver: &self.resolver,
            reporter: reporter.as_ref(),
            deprovisioner: self.deprovisioner.as_ref(),
        };

        let mut plan = flow.plan(&ctx, &services, &releases).await?;
        let task_count = plan.task_count();

        let (status, finished_time) = if task_count == 0 {
            (AttemptStatus::Empty, Some(now))
        } else {
            (AttemptStatus::Dispatched, None)
        };
        plan.transaction.record(WriteOp::CreateAttempt(PublishAttempt {
            id: attempt_id,
            gateway_id: gateway.id,
            source,
            trigger,
            status,
            expected_tasks: u32::try_from(task_count).unwrap_or(u32::MAX),
            succeeded: 0,
            failed: 0,
            message: String::new(),
            created_by: request.author.clone(),
            created_time: now,
            finished_time,
        }));

        let tasks = plan.transaction.commit(self.store.as_ref())?;

        for history in &plan.dispatched {
            reporter.report_task_created(history);
        }

        if tasks.is_empty() {
            let reason = first_failure(&plan.outcomes);
            tracing::warn!(attempt_id = %attempt_id, reason = %reason, "Nothing dispatched");
            return Ok(DispatchResult::NotDispatched {
                attempt_id,
                reason,
                outcomes: plan.outcomes,
            });
        }

        let handle = self
            .scheduler
            .schedule(
                TaskGroup::new(attempt_id, tasks),
                self.recorder_for(flow),
                request.mode,
            )
            .await?;

        Ok(DispatchResult::Dispatched(DispatchReport {
            attempt_id,
            trigger,
            outcomes: plan.outcomes,
            handle,
        }))
    }

    /// Replay an attempt whose key was used before.
    ///
    /// Nothing is planned again: the outcomes are read back from the
    /// attempt's stored rows, and only its own unfinished tasks are handed
    /// to the scheduler. Rows that failed stay failed; a new publish needs a
    /// new key.
    async fn resume(
        &self,
        attempt: &PublishAttempt,
        gateway: &Gateway,
        source: PublishSource,
        mode: ExecutionMode,
    ) -> Result<DispatchResult> {
        if attempt.source != source {
            return Err(PublishError::Configuration(format!(
                "attempt {} was created for source {}, not {source}",
                attempt.id, attempt.source
            )));
        }

        let histories = self.store.list_histories_by_attempt(&attempt.id)?;
        let tasks = self.store.list_tasks_by_attempt(&attempt.id)?;
        let outcomes = stored_outcomes(&histories, &tasks);

        tracing::info!(
            attempt_id = %attempt.id,
            status = ?attempt.status,
            targets = outcomes.len(),
            tasks = tasks.len(),
            "Attempt key already used, replaying stored attempt"
        );

        if tasks.is_empty() {
            let reason = first_failure(&outcomes);
            return Ok(DispatchResult::NotDispatched {
                attempt_id: attempt.id,
                reason,
                outcomes,
            });
        }

        let mut stage_names: HashMap<StageId, String> = HashMap::new();
        let mut scheduled = Vec::with_capacity(tasks.len());
        for task in tasks {
            let stage_name = match stage_names.get(&task.stage_id) {
                Some(name) => name.clone(),
                None => {
                    let name = self
                        .store
                        .get_stage(task.stage_id)?
                        .map(|stage| stage.name)
                        .unwrap_or_default();
                    stage_names.insert(task.stage_id, name.clone());
                    name
                }
            };
            let data_plane_name = self
                .store
                .get_data_plane(task.data_plane_id)?
                .map(|data_plane| data_plane.name)
                .unwrap_or_default();

            let request =
                DeploymentRequest::for_task(&task, &gateway.name, &stage_name, &data_plane_name);
            scheduled.push(ScheduledTask {
                record: task,
                request,
            });
        }

        let flow = PublishFlow::select(attempt.trigger, gateway.hosting_type);
        let handle = self
            .scheduler
            .schedule(
                TaskGroup::new(attempt.id, scheduled),
                self.recorder_for(flow),
                mode,
            )
            .await?;

        Ok(DispatchResult::Dispatched(DispatchReport {
            attempt_id: attempt.id,
            trigger: attempt.trigger,
            outcomes,
            handle,
        }))
    }
}

/// Rebuild the per-target outcomes of an attempt from its stored rows.
fn stored_outcomes(
    histories: &[ReleaseHistory],
    tasks: &[DataPlaneReleaseTask],
) -> Vec<TargetOutcome> {
    let mut outcomes: Vec<TargetOutcome> = histories
        .iter()
        .map(|history| TargetOutcome {
            stage_id: history.stage_id,
            data_plane_id: (!history.data_plane_id.is_unresolved()).then_some(history.data_plane_id),
            history_id: Some(history.id),
            task_id: tasks
                .iter()
                .find(|task| task.history_id == Some(history.id))
                .map(|task| task.id),
            status: history.status,
            message: history.message.clone(),
        })
        .collect();

    // Delete-flow teardowns have no history row.
    outcomes.extend(
        tasks
            .iter()
            .filter(|task| task.history_id.is_none())
            .map(|task| TargetOutcome {
                stage_id: task.stage_id,
                data_plane_id: Some(task.data_plane_id),
                history_id: None,
                task_id: Some(task.id),
                status: match task.status {
                    TaskStatus::Queued | TaskStatus::Running => HistoryStatus::Dispatched,
                    TaskStatus::Succeeded => HistoryStatus::Success,
                    TaskStatus::Failed => HistoryStatus::Failure,
                },
                message: task.message.clone(),
            }),
    );

    outcomes
}

fn first_failure(outcomes: &[TargetOutcome]) -> String {
    outcomes
        .iter()
        .find(|outcome| !outcome.message.is_empty())
        .map_or_else(
            || "no task was scheduled".to_string(),
            |outcome| outcome.message.clone(),
        )
}
