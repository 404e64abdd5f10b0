//! Rollout task scheduling.
//!
//! The scheduler fans one committed attempt out into independent tasks, one
//! per `(stage, data plane)`, runs each against its deployment backend and
//! reports every terminal outcome to a [`CompletionHandler`].
//!
//! # Execution modes
//!
//! - `Async`: tasks go to an unbounded queue drained by a worker loop that
//!   spawns one tokio task per job. [`RolloutTaskScheduler::schedule`]
//!   returns as soon as the tasks are queued.
//! - `Sync`: tasks run inline and are joined; `schedule` returns once every
//!   backend call has answered.
//!
//! Backends may answer that a job keeps running. The task then stays
//! `running` until [`RolloutTaskScheduler::complete_task`] is called.

pub mod aggregator;

use std::sync::{Arc, OnceLock};

use apigw_release_core::{AttemptId, CoreError, TaskId};
use apigw_release_store::{DataPlaneReleaseTask, Store, StoreError, TaskStatus};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::backend::{Backends, DeploymentRequest, JobState};
use crate::error::{PublishError, Result};
use crate::types::ExecutionMode;

pub use aggregator::{GroupTracker, GroupVerdict};
use aggregator::{GroupEvent, Registration};

/// Terminal outcome of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The backend finished the job.
    Succeeded {
        /// Backend job id.
        job_id: String,
    },
    /// The backend rejected or failed the job.
    Failed {
        /// Backend message, verbatim.
        message: String,
    },
}

impl TaskOutcome {
    /// Returns true for `Succeeded`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// The failure message, empty on success.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Succeeded { .. } => "",
            Self::Failed { message } => message,
        }
    }
}

/// Callbacks fired as the tasks of a group finish.
pub trait CompletionHandler: Send + Sync {
    /// A task reached a terminal status. Fires once per task.
    fn on_task_finished(&self, task: &DataPlaneReleaseTask, outcome: &TaskOutcome);

    /// Every task of the group succeeded. Fires at most once.
    fn on_group_success(&self, attempt_id: &AttemptId);

    /// The first task of the group failed. Fires at most once.
    fn on_group_failure(&self, attempt_id: &AttemptId, message: &str);
}

/// A committed task and the request its backend receives.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    /// The stored task record.
    pub record: DataPlaneReleaseTask,
    /// Backend request.
    pub request: DeploymentRequest,
}

/// The tasks of one attempt.
#[derive(Debug)]
pub struct TaskGroup {
    attempt_id: AttemptId,
    tasks: Vec<ScheduledTask>,
}

impl TaskGroup {
    /// Group committed tasks.
    #[must_use]
    pub fn new(attempt_id: AttemptId, tasks: Vec<ScheduledTask>) -> Self {
        Self { attempt_id, tasks }
    }

    /// The attempt.
    #[must_use]
    pub const fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the group has no task.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Completion handle of a scheduled group.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    attempt_id: AttemptId,
    verdict: watch::Receiver<Option<GroupVerdict>>,
}

impl TaskHandle {
    fn new(attempt_id: AttemptId, verdict: watch::Receiver<Option<GroupVerdict>>) -> Self {
        Self {
            attempt_id,
            verdict,
        }
    }

    fn resolved(attempt_id: AttemptId, verdict: GroupVerdict) -> Self {
        let (_sender, receiver) = watch::channel(Some(verdict));
        Self::new(attempt_id, receiver)
    }

    /// The attempt.
    #[must_use]
    pub const fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    /// The verdict, if every task already finished.
    #[must_use]
    pub fn verdict(&self) -> Option<GroupVerdict> {
        self.verdict.borrow().clone()
    }

    /// Wait until every task of the group finished.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Internal` if the scheduler dropped the group
    /// before it settled.
    pub async fn wait(&mut self) -> Result<GroupVerdict> {
        if let Some(verdict) = self.verdict() {
            return Ok(verdict);
        }

        let settled = self
            .verdict
            .wait_for(Option::is_some)
            .await
            .map(|verdict| Option::clone(&verdict));

        match settled {
            Ok(Some(verdict)) => Ok(verdict),
            _ => self.verdict().ok_or_else(|| {
                PublishError::Internal(format!(
                    "task group {} was dropped before it settled",
                    self.attempt_id
                ))
            }),
        }
    }
}

struct Job {
    attempt_id: AttemptId,
    task: ScheduledTask,
}

struct Inner<S: Store> {
    store: Arc<S>,
    backends: Backends,
    tracker: GroupTracker,
    fallback: Option<Arc<dyn CompletionHandler>>,
}

/// Fans committed attempts out across data planes.
pub struct RolloutTaskScheduler<S: Store> {
    inner: Arc<Inner<S>>,
    queue: OnceLock<mpsc::UnboundedSender<Job>>,
}

impl<S: Store + 'static> RolloutTaskScheduler<S> {
    /// Create a scheduler.
    #[must_use]
    pub fn new(store: Arc<S>, backends: Backends) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                backends,
                tracker: GroupTracker::new(),
                fallback: None,
            }),
            queue: OnceLock::new(),
        }
    }

    /// Handler used for completions of groups this process no longer
    /// tracks, e.g. callbacks arriving after a restart.
    #[must_use]
    pub fn with_fallback_handler(self, handler: Arc<dyn CompletionHandler>) -> Self {
        let inner = Inner {
            store: Arc::clone(&self.inner.store),
            backends: self.inner.backends.clone(),
            tracker: GroupTracker::new(),
            fallback: Some(handler),
        };
        Self {
            inner: Arc::new(inner),
            queue: OnceLock::new(),
        }
    }

    /// Returns true if the attempt has tasks in flight.
    #[must_use]
    pub fn is_tracking(&self, attempt_id: &AttemptId) -> bool {
        self.inner.tracker.is_tracking(attempt_id)
    }

    /// Schedule the tasks of one attempt.
    ///
    /// Tasks already terminal in the store are not run again, and a group
    /// already in flight is not registered twice; its existing handle is
    /// returned instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the queue is closed.
    pub async fn schedule(
        &self,
        group: TaskGroup,
        handler: Arc<dyn CompletionHandler>,
        mode: ExecutionMode,
    ) -> Result<TaskHandle> {
        let attempt_id = group.attempt_id;

        let mut pending = Vec::with_capacity(group.tasks.len());
        let mut prior_failure = None;
        for task in group.tasks {
            match self.inner.store.get_task(&task.record.id)? {
                Some(stored) if stored.status.is_terminal() => {
                    tracing::debug!(task_id = %stored.id, status = ?stored.status, "Task already finished, not re-run");
                    if stored.status == TaskStatus::Failed && prior_failure.is_none() {
                        prior_failure = Some(stored.message);
                    }
                }
                _ => pending.push(task),
            }
        }

        if pending.is_empty() {
            let verdict = prior_failure.map_or(GroupVerdict::Success, GroupVerdict::Failure);
            tracing::info!(attempt_id = %attempt_id, verdict = ?verdict, "Every task of the attempt already finished");
            return Ok(TaskHandle::resolved(attempt_id, verdict));
        }

        let receiver =
            match self
                .inner
                .tracker
                .register(attempt_id, pending.len(), prior_failure, handler)
            {
                Registration::New(receiver) => receiver,
                Registration::Existing(receiver) => {
                    tracing::info!(attempt_id = %attempt_id, "Task group already in flight");
                    return Ok(TaskHandle::new(attempt_id, receiver));
                }
            };

        tracing::info!(
            attempt_id = %attempt_id,
            tasks = pending.len(),
            mode = ?mode,
            "Scheduling rollout tasks"
        );

        match mode {
            ExecutionMode::Sync => {
                join_all(
                    pending
                        .into_iter()
                        .map(|task| self.inner.run_task(attempt_id, task)),
                )
                .await;
            }
            ExecutionMode::Async => {
                let queue = self.queue();
                for task in pending {
                    queue.send(Job { attempt_id, task }).map_err(|_| {
                        PublishError::Internal("rollout queue is closed".to_string())
                    })?;
                }
            }
        }

        Ok(TaskHandle::new(attempt_id, receiver))
    }

    /// Record the out-of-band completion of a task whose backend answered
    /// that the job keeps running.
    ///
    /// Completing a task that is already terminal returns it unchanged.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::NotFound` if the task doesn't exist.
    pub fn complete_task(
        &self,
        task_id: &TaskId,
        outcome: &TaskOutcome,
    ) -> Result<DataPlaneReleaseTask> {
        let task = self
            .inner
            .store
            .get_task(task_id)?
            .ok_or(CoreError::TaskNotFound(*task_id))?;

        if task.status.is_terminal() {
            tracing::debug!(task_id = %task_id, status = ?task.status, "Completion for finished task ignored");
            return Ok(task);
        }

        match self.inner.finish(&task, outcome)? {
            Some(task) => Ok(task),
            None => Ok(self
                .inner
                .store
                .get_task(task_id)?
                .ok_or(CoreError::TaskNotFound(*task_id))?),
        }
    }

    fn queue(&self) -> &mpsc::UnboundedSender<Job> {
        self.queue.get_or_init(|| {
            let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
            let inner = Arc::clone(&self.inner);

            tokio::spawn(async move {
                while let Some(job) = receiver.recv().await {
                    let inner = Arc::clone(&inner);
                    tokio::spawn(async move {
                        inner.run_task(job.attempt_id, job.task).await;
                    });
                }
                tracing::debug!("Rollout queue closed");
            });

            sender
        })
    }
}

impl<S: Store> Inner<S> {
    async fn run_task(&self, attempt_id: AttemptId, task: ScheduledTask) {
        let task_id = task.record.id;

        match self
            .store
            .update_task_status(&task_id, TaskStatus::Running, None, "")
        {
            Ok(_) => {}
            Err(StoreError::Immutable(_)) => {
                tracing::debug!(task_id = %task_id, "Task already finished, skipping");
                return;
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Failed to mark task running");
                let outcome = TaskOutcome::Failed {
                    message: format!("failed to start task: {e}"),
                };
                self.notify(&attempt_id, &task.record, &outcome);
                self.settle(&attempt_id, &task_id, &outcome);
                return;
            }
        }

        let outcome = match self.backends.execute(&task.request).await {
            Ok(receipt) if receipt.state == JobState::Running => {
                if let Err(e) = self.store.update_task_status(
                    &task_id,
                    TaskStatus::Running,
                    Some(&receipt.job_id),
                    "",
                ) {
                    tracing::warn!(task_id = %task_id, error = %e, "Failed to record backend job id");
                }
                tracing::info!(
                    task_id = %task_id,
                    job_id = %receipt.job_id,
                    "Backend job running, waiting for completion callback"
                );
                return;
            }
            Ok(receipt) => TaskOutcome::Succeeded {
                job_id: receipt.job_id,
            },
            Err(e) => {
                let error = PublishError::from(e);
                tracing::warn!(
                    task_id = %task_id,
                    data_plane_id = %task.request.data_plane_id,
                    error = %error,
                    "Deployment backend failed"
                );
                TaskOutcome::Failed {
                    message: error.failure_message(),
                }
            }
        };

        if let Err(e) = self.finish(&task.record, &outcome) {
            tracing::error!(task_id = %task_id, error = %e, "Failed to record task outcome");
        }
    }

    /// Persist a terminal outcome and fire the callbacks it triggers.
    ///
    /// If the task row cannot be written, the target is still reported as
    /// failed so its history row and the attempt settle.
    ///
    /// Returns `None` if the task was already terminal.
    fn finish(
        &self,
        task: &DataPlaneReleaseTask,
        outcome: &TaskOutcome,
    ) -> Result<Option<DataPlaneReleaseTask>> {
        let attempt_id = task.attempt_id;
        let (status, job_id) = match outcome {
            TaskOutcome::Succeeded { job_id } => (TaskStatus::Succeeded, Some(job_id.as_str())),
            TaskOutcome::Failed { .. } => (TaskStatus::Failed, None),
        };

        let stored = match self
            .store
            .update_task_status(&task.id, status, job_id, outcome.message())
        {
            Ok(stored) => stored,
            Err(StoreError::Immutable(_)) => {
                tracing::debug!(task_id = %task.id, "Task already finished");
                return Ok(None);
            }
            Err(e) => {
                let failed = TaskOutcome::Failed {
                    message: format!("failed to record task outcome: {e}"),
                };
                self.notify(&attempt_id, task, &failed);
                self.settle(&attempt_id, &task.id, &failed);
                return Err(e.into());
            }
        };

        self.notify(&attempt_id, &stored, outcome);
        self.settle(&attempt_id, &task.id, outcome);
        Ok(Some(stored))
    }

    /// Fire the per-task callback of the group, or of the fallback handler.
    fn notify(&self, attempt_id: &AttemptId, task: &DataPlaneReleaseTask, outcome: &TaskOutcome) {
        match self.tracker.handler(attempt_id).or_else(|| self.fallback.clone()) {
            Some(handler) => handler.on_task_finished(task, outcome),
            None => tracing::warn!(
                task_id = %task.id,
                attempt_id = %attempt_id,
                "No handler for task group, recorded task status only"
            ),
        }
    }

    /// Count the outcome towards its group and fire the group callback.
    fn settle(&self, attempt_id: &AttemptId, task_id: &TaskId, outcome: &TaskOutcome) {
        if let Some(fired) = self.tracker.record(attempt_id, task_id, outcome) {
            match fired.event {
                GroupEvent::Failed(message) => fired.handler.on_group_failure(attempt_id, &message),
                GroupEvent::Succeeded => fired.handler.on_group_success(attempt_id),
            }
        }
    }
}
