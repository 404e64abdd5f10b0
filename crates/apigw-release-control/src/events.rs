//! Lifecycle event reporting.
//!
//! Flows notify an [`EventReporter`] at each phase of a history row. The
//! default [`TracingEventReporter`] turns them into `tracing` events under
//! the `apigw_release::events` target; [`NoopEventReporter`] is the sentinel
//! used where no history row exists.

use apigw_release_store::ReleaseHistory;

/// Receives lifecycle events of history rows.
pub trait EventReporter: Send + Sync {
    /// A row failed pre-flight validation.
    fn report_validation_failed(&self, history: &ReleaseHistory, message: &str);

    /// A row passed pre-flight validation.
    fn report_validation_succeeded(&self, history: &ReleaseHistory);

    /// A rollout task was committed for the row.
    fn report_task_created(&self, history: &ReleaseHistory);

    /// The task of the row reached a terminal status.
    fn report_task_finished(&self, history: &ReleaseHistory, ok: bool, message: &str);
}

/// Reports events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventReporter;

impl EventReporter for TracingEventReporter {
    fn report_validation_failed(&self, history: &ReleaseHistory, message: &str) {
        tracing::warn!(
            target: "apigw_release::events",
            history_id = %history.id,
            gateway_id = %history.gateway_id,
            stage_id = %history.stage_id,
            data_plane_id = %history.data_plane_id,
            message = %message,
            "Validation failed"
        );
    }

    fn report_validation_succeeded(&self, history: &ReleaseHistory) {
        tracing::info!(
            target: "apigw_release::events",
            history_id = %history.id,
            gateway_id = %history.gateway_id,
            stage_id = %history.stage_id,
            data_plane_id = %history.data_plane_id,
            "Validation succeeded"
        );
    }

    fn report_task_created(&self, history: &ReleaseHistory) {
        tracing::info!(
            target: "apigw_release::events",
            history_id = %history.id,
            attempt_id = %history.attempt_id,
            data_plane_id = %history.data_plane_id,
            "Rollout task created"
        );
    }

    fn report_task_finished(&self, history: &ReleaseHistory, ok: bool, message: &str) {
        if ok {
            tracing::info!(
                target: "apigw_release::events",
                history_id = %history.id,
                data_plane_id = %history.data_plane_id,
                "Rollout task succeeded"
            );
        } else {
            tracing::warn!(
                target: "apigw_release::events",
                history_id = %history.id,
                data_plane_id = %history.data_plane_id,
                message = %message,
                "Rollout task failed"
            );
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventReporter;

impl EventReporter for NoopEventReporter {
    fn report_validation_failed(&self, _history: &ReleaseHistory, _message: &str) {}

    fn report_validation_succeeded(&self, _history: &ReleaseHistory) {}

    fn report_task_created(&self, _history: &ReleaseHistory) {}

    fn report_task_finished(&self, _history: &ReleaseHistory, _ok: bool, _message: &str) {}
}

/// An in-memory reporter for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use apigw_release_core::HistoryId;
    use parking_lot::Mutex;

    /// One recorded event.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RecordedEvent {
        /// See [`EventReporter::report_validation_failed`].
        ValidationFailed(HistoryId, String),
        /// See [`EventReporter::report_validation_succeeded`].
        ValidationSucceeded(HistoryId),
        /// See [`EventReporter::report_task_created`].
        TaskCreated(HistoryId),
        /// See [`EventReporter::report_task_finished`].
        TaskFinished(HistoryId, bool),
    }

    /// Records every event in order.
    #[derive(Default)]
    pub struct RecordingEventReporter {
        events: Mutex<Vec<RecordedEvent>>,
    }

    impl RecordingEventReporter {
        /// Create an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Snapshot of the recorded events.
        #[must_use]
        pub fn events(&self) -> Vec<RecordedEvent> {
            self.events.lock().clone()
        }

        /// Number of events matching a predicate.
        #[must_use]
        pub fn count(&self, predicate: impl Fn(&RecordedEvent) -> bool) -> usize {
            self.events.lock().iter().filter(|e| predicate(e)).count()
        }
    }

    impl EventReporter for RecordingEventReporter {
        fn report_validation_failed(&self, history: &ReleaseHistory, message: &str) {
            self.events
                .lock()
                .push(RecordedEvent::ValidationFailed(history.id, message.to_string()));
        }

        fn report_validation_succeeded(&self, history: &ReleaseHistory) {
            self.events
                .lock()
                .push(RecordedEvent::ValidationSucceeded(history.id));
        }

        fn report_task_created(&self, history: &ReleaseHistory) {
            self.events.lock().push(RecordedEvent::TaskCreated(history.id));
        }

        fn report_task_finished(&self, history: &ReleaseHistory, ok: bool, _message: &str) {
            self.events
                .lock()
                .push(RecordedEvent::TaskFinished(history.id, ok));
        }
    }
}
