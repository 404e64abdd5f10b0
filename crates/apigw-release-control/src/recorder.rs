//! Persists task outcomes.
//!
//! [`ReleaseRecorder`] is the completion handler of every dispatched
//! attempt. Per task it moves the history row to its terminal status,
//! advances the release pointer after a successful deploy and updates the
//! attempt counters. The group callbacks settle the attempt status.

use std::sync::Arc;

use apigw_release_core::{AttemptId, TaskIntent};
use apigw_release_store::{
    AttemptStatus, DataPlaneReleaseTask, HistoryStatus, PublishAttempt, Release, ReleaseHistory,
    Store, StoreError,
};
use chrono::Utc;
use parking_lot::Mutex;

use crate::events::EventReporter;
use crate::scheduler::{CompletionHandler, TaskOutcome};

/// Completion handler writing task outcomes back to the store.
pub struct ReleaseRecorder<S: Store> {
    store: Arc<S>,
    reporter: Arc<dyn EventReporter>,
    attempt_lock: Mutex<()>,
}

impl<S: Store> ReleaseRecorder<S> {
    /// Create a recorder.
    #[must_use]
    pub fn new(store: Arc<S>, reporter: Arc<dyn EventReporter>) -> Self {
        Self {
            store,
            reporter,
            attempt_lock: Mutex::new(()),
        }
    }

    fn record_history(&self, task: &DataPlaneReleaseTask, outcome: &TaskOutcome) {
        let Some(history_id) = task.history_id else {
            return;
        };

        let status = if outcome.is_success() {
            HistoryStatus::Success
        } else {
            HistoryStatus::Failure
        };

        let history = match self
            .store
            .update_history_status(&history_id, status, outcome.message())
        {
            Ok(history) => history,
            Err(StoreError::Immutable(_)) => {
                tracing::debug!(history_id = %history_id, "History row already terminal");
                return;
            }
            Err(e) => {
                tracing::error!(history_id = %history_id, error = %e, "Failed to record history outcome");
                return;
            }
        };

        self.reporter
            .report_task_finished(&history, outcome.is_success(), outcome.message());

        if outcome.is_success() && task.intent == TaskIntent::Deploy {
            self.advance_release(&history);
        }
    }

    fn advance_release(&self, history: &ReleaseHistory) {
        let release = Release {
            gateway_id: history.gateway_id,
            stage_id: history.stage_id,
            resource_version_id: history.resource_version_id,
            history_id: Some(history.id),
            released_at: history.created_time,
            updated_at: Utc::now(),
        };

        match self.store.upsert_release(&release) {
            Ok(true) => tracing::info!(
                gateway_id = %release.gateway_id,
                stage_id = %release.stage_id,
                resource_version_id = %release.resource_version_id,
                "Release advanced"
            ),
            Ok(false) => tracing::info!(
                gateway_id = %release.gateway_id,
                stage_id = %release.stage_id,
                history_id = %history.id,
                "Newer release already live, pointer kept"
            ),
            Err(e) => tracing::error!(
                gateway_id = %release.gateway_id,
                stage_id = %release.stage_id,
                error = %e,
                "Failed to advance release"
            ),
        }
    }

    fn update_attempt(&self, attempt_id: &AttemptId, update: impl FnOnce(&mut PublishAttempt)) {
        let _guard = self.attempt_lock.lock();

        let mut attempt = match self.store.get_attempt(attempt_id) {
            Ok(Some(attempt)) => attempt,
            Ok(None) => {
                tracing::warn!(attempt_id = %attempt_id, "Outcome for unknown attempt");
                return;
            }
            Err(e) => {
                tracing::error!(attempt_id = %attempt_id, error = %e, "Failed to load attempt");
                return;
            }
        };

        update(&mut attempt);

        if let Err(e) = self.store.put_attempt(&attempt) {
            tracing::error!(attempt_id = %attempt_id, error = %e, "Failed to update attempt");
        }
    }
}

fn settle(attempt: &mut PublishAttempt, status: AttemptStatus) {
    if attempt.status == AttemptStatus::Dispatched {
        attempt.status = status;
    }
    if attempt.finished_time.is_none() && attempt.succeeded + attempt.failed >= attempt.expected_tasks {
        attempt.finished_time = Some(Utc::now());
    }
}

impl<S: Store> CompletionHandler for ReleaseRecorder<S> {
    fn on_task_finished(&self, task: &DataPlaneReleaseTask, outcome: &TaskOutcome) {
        self.record_history(task, outcome);

        self.update_attempt(&task.attempt_id, |attempt| {
            if outcome.is_success() {
                attempt.succeeded += 1;
            } else {
                attempt.failed += 1;
                if attempt.message.is_empty() {
                    attempt.message = outcome.message().to_string();
                }
            }

            // Completions after a restart arrive without group callbacks.
            if attempt.succeeded + attempt.failed >= attempt.expected_tasks {
                let status = if attempt.failed == 0 {
                    AttemptStatus::Success
                } else {
                    AttemptStatus::Failure
                };
                settle(attempt, status);
            }
        });
    }

    fn on_group_success(&self, attempt_id: &AttemptId) {
        tracing::info!(attempt_id = %attempt_id, "Every rollout task succeeded");
        self.update_attempt(attempt_id, |attempt| settle(attempt, AttemptStatus::Success));
    }

    fn on_group_failure(&self, attempt_id: &AttemptId, message: &str) {
        tracing::warn!(attempt_id = %attempt_id, message = %message, "Rollout task group failed");
        self.update_attempt(attempt_id, |attempt| {
            if attempt.message.is_empty() {
                attempt.message = message.to_string();
            }
            settle(attempt, AttemptStatus::Failure);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::mock::{RecordedEvent, RecordingEventReporter};
    use apigw_release_core::{
        DataPlaneId, GatewayId, HistoryId, ResourceVersionId, StageId, TaskId,
    };
    use apigw_release_store::{
        PublishSource, RocksStore, RolloutMechanism, TaskStatus, TriggerPublishType, WriteOp,
        WriteSet,
    };
    use chrono::Duration;
    use tempfile::TempDir;

    struct Fixture {
        store: Arc<RocksStore>,
        reporter: Arc<RecordingEventReporter>,
        recorder: ReleaseRecorder<RocksStore>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let reporter = Arc::new(RecordingEventReporter::new());
        let recorder = ReleaseRecorder::new(Arc::clone(&store), reporter.clone());
        Fixture {
            store,
            reporter,
            recorder,
            _dir: dir,
        }
    }

    /// Commit an attempt with one dispatched row and task per data plane.
    fn dispatch(
        store: &RocksStore,
        key: &str,
        rv: u64,
        created: chrono::DateTime<Utc>,
        data_planes: &[u64],
    ) -> Vec<DataPlaneReleaseTask> {
        let gateway_id = GatewayId::new(1);
        let stage_id = StageId::new(1);
        let attempt_id = AttemptId::from_key(gateway_id, key);
        let mut writes = WriteSet::new();
        let mut tasks = Vec::new();

        writes.push(WriteOp::CreateAttempt(PublishAttempt {
            id: attempt_id,
            gateway_id,
            source: PublishSource::ManualPublish,
            trigger: TriggerPublishType::RollingUpdate,
            status: AttemptStatus::Dispatched,
            expected_tasks: u32::try_from(data_planes.len()).unwrap(),
            succeeded: 0,
            failed: 0,
            message: String::new(),
            created_by: "alice".to_string(),
            created_time: created,
            finished_time: None,
        }));

        for dp in data_planes {
            let data_plane_id = DataPlaneId::new(*dp);
            let history_id = HistoryId::derive(&attempt_id, stage_id, data_plane_id);
            writes.push(WriteOp::CreateHistory(ReleaseHistory {
                id: history_id,
                attempt_id,
                gateway_id,
                stage_id,
                resource_version_id: ResourceVersionId::new(rv),
                data_plane_id,
                source: PublishSource::ManualPublish,
                status: HistoryStatus::Dispatched,
                message: String::new(),
                created_by: "alice".to_string(),
                created_time: created,
                updated_time: created,
                deprovision_operation_id: None,
            }));
            let task = DataPlaneReleaseTask {
                id: TaskId::derive(&attempt_id, stage_id, data_plane_id, TaskIntent::Deploy),
                history_id: Some(history_id),
                attempt_id,
                gateway_id,
                stage_id,
                resource_version_id: ResourceVersionId::new(rv),
                data_plane_id,
                mechanism: RolloutMechanism::SharedRegistryPush,
                intent: TaskIntent::Deploy,
                status: TaskStatus::Running,
                job_id: None,
                message: String::new(),
                created_time: created,
                updated_time: created,
            };
            writes.push(WriteOp::CreateTask(task.clone()));
            tasks.push(task);
        }

        store.apply(&writes).unwrap();
        tasks
    }

    fn ok() -> TaskOutcome {
        TaskOutcome::Succeeded {
            job_id: "job".to_string(),
        }
    }

    #[test]
    fn success_advances_release_and_settles_attempt() {
        let fx = fixture();
        let tasks = dispatch(&fx.store, "a", 5, Utc::now(), &[1, 2]);

        for task in &tasks {
            fx.recorder.on_task_finished(task, &ok());
        }

        for task in &tasks {
            let history = fx.store.get_history(&task.history_id.unwrap()).unwrap().unwrap();
            assert_eq!(history.status, HistoryStatus::Success);
        }
        let release = fx
            .store
            .get_release(GatewayId::new(1), StageId::new(1))
            .unwrap()
            .unwrap();
        assert_eq!(release.resource_version_id.get(), 5);

        let attempt = fx.store.get_attempt(&tasks[0].attempt_id).unwrap().unwrap();
        assert_eq!(attempt.status, AttemptStatus::Success);
        assert_eq!(attempt.succeeded, 2);
        assert!(attempt.finished_time.is_some());
        assert_eq!(
            fx.reporter
                .count(|e| matches!(e, RecordedEvent::TaskFinished(_, true))),
            2
        );
    }

    #[test]
    fn failure_keeps_release_and_message() {
        let fx = fixture();
        let tasks = dispatch(&fx.store, "b", 5, Utc::now(), &[1, 2]);

        fx.recorder.on_task_finished(&tasks[0], &ok());
        fx.recorder.on_task_finished(
            &tasks[1],
            &TaskOutcome::Failed {
                message: "chart rollout timed out".to_string(),
            },
        );
        fx.recorder
            .on_group_failure(&tasks[1].attempt_id, "chart rollout timed out");

        let failed = fx
            .store
            .get_history(&tasks[1].history_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, HistoryStatus::Failure);
        assert_eq!(failed.message, "chart rollout timed out");

        let attempt = fx.store.get_attempt(&tasks[0].attempt_id).unwrap().unwrap();
        assert_eq!(attempt.status, AttemptStatus::Failure);
        assert_eq!(attempt.message, "chart rollout timed out");
        assert_eq!((attempt.succeeded, attempt.failed), (1, 1));
    }

    #[test]
    fn late_older_success_does_not_regress_release() {
        let fx = fixture();
        let now = Utc::now();
        let older = dispatch(&fx.store, "old", 4, now - Duration::minutes(5), &[1]);
        let newer = dispatch(&fx.store, "new", 5, now, &[1]);

        fx.recorder.on_task_finished(&newer[0], &ok());
        fx.recorder.on_task_finished(&older[0], &ok());

        let release = fx
            .store
            .get_release(GatewayId::new(1), StageId::new(1))
            .unwrap()
            .unwrap();
        assert_eq!(release.resource_version_id.get(), 5);
        assert_eq!(release.history_id, newer[0].history_id);
    }
}
