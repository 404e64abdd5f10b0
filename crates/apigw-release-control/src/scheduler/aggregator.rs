//! Fan-out/join aggregation of task groups.
//!
//! The tracker counts the terminal outcomes of every task of an attempt and
//! decides which group callback fires: the failure callback once, on the
//! first failure, and the success callback once, when every task succeeded.
//! Callbacks are returned to the caller and invoked outside the lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use apigw_release_core::{AttemptId, TaskId};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{CompletionHandler, TaskOutcome};

/// Final verdict of a task group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupVerdict {
    /// Every task succeeded.
    Success,
    /// At least one task failed; carries the first failure message.
    Failure(String),
}

impl GroupVerdict {
    /// Returns true for `Success`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// A group callback that must be fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEvent {
    /// Fire `on_group_failure` with the message.
    Failed(String),
    /// Fire `on_group_success`.
    Succeeded,
}

/// A group event together with the handler it is addressed to.
pub struct Fired {
    /// Handler registered for the group.
    pub handler: Arc<dyn CompletionHandler>,
    /// The event.
    pub event: GroupEvent,
}

/// Outcome of [`GroupTracker::register`].
#[derive(Debug)]
pub enum Registration {
    /// The group is new; its tasks must be run.
    New(watch::Receiver<Option<GroupVerdict>>),
    /// The group is already in flight; nothing must be run again.
    Existing(watch::Receiver<Option<GroupVerdict>>),
}

struct GroupState {
    expected: usize,
    finished: HashSet<TaskId>,
    first_failure: Option<String>,
    handler: Arc<dyn CompletionHandler>,
    verdict: watch::Sender<Option<GroupVerdict>>,
}

/// In-flight task groups keyed by attempt.
#[derive(Default)]
pub struct GroupTracker {
    groups: Mutex<HashMap<AttemptId, GroupState>>,
}

impl GroupTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group of `expected` tasks.
    ///
    /// `prior_failure` carries the message of a task of the same attempt that
    /// already failed in an earlier run; the failure callback then never
    /// fires again and the verdict is a failure.
    pub fn register(
        &self,
        attempt_id: AttemptId,
        expected: usize,
        prior_failure: Option<String>,
        handler: Arc<dyn CompletionHandler>,
    ) -> Registration {
        let mut groups = self.groups.lock();

        if let Some(state) = groups.get(&attempt_id) {
            return Registration::Existing(state.verdict.subscribe());
        }

        let (verdict, receiver) = watch::channel(None);
        groups.insert(
            attempt_id,
            GroupState {
                expected,
                finished: HashSet::with_capacity(expected),
                first_failure: prior_failure,
                handler,
                verdict,
            },
        );
        Registration::New(receiver)
    }

    /// The handler registered for an attempt.
    #[must_use]
    pub fn handler(&self, attempt_id: &AttemptId) -> Option<Arc<dyn CompletionHandler>> {
        self.groups
            .lock()
            .get(attempt_id)
            .map(|state| Arc::clone(&state.handler))
    }

    /// Returns true if the attempt has tasks in flight.
    #[must_use]
    pub fn is_tracking(&self, attempt_id: &AttemptId) -> bool {
        self.groups.lock().contains_key(attempt_id)
    }

    /// Number of groups in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.lock().len()
    }

    /// Returns true if no group is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.lock().is_empty()
    }

    /// Record the terminal outcome of one task.
    ///
    /// Returns the group callback to fire, if any. Outcomes for unknown
    /// groups and repeated outcomes for the same task are ignored.
    pub fn record(
        &self,
        attempt_id: &AttemptId,
        task_id: &TaskId,
        outcome: &TaskOutcome,
    ) -> Option<Fired> {
        let mut groups = self.groups.lock();

        let Some(state) = groups.get_mut(attempt_id) else {
            tracing::debug!(attempt_id = %attempt_id, task_id = %task_id, "Outcome for untracked group");
            return None;
        };

        if !state.finished.insert(*task_id) {
            tracing::debug!(attempt_id = %attempt_id, task_id = %task_id, "Duplicate task outcome ignored");
            return None;
        }

        let mut event = None;
        if let TaskOutcome::Failed { message } = outcome {
            if state.first_failure.is_none() {
                state.first_failure = Some(message.clone());
                event = Some(GroupEvent::Failed(message.clone()));
            } else {
                tracing::info!(
                    attempt_id = %attempt_id,
                    task_id = %task_id,
                    message = %message,
                    "Additional task failure in group"
                );
            }
        }

        if state.finished.len() < state.expected {
            let handler = Arc::clone(&state.handler);
            return event.map(|event| Fired { handler, event });
        }

        // Every task reported: settle the group.
        let state = groups.remove(attempt_id)?;
        let verdict = match state.first_failure {
            Some(message) => GroupVerdict::Failure(message),
            None => {
                event = Some(GroupEvent::Succeeded);
                GroupVerdict::Success
            }
        };
        state.verdict.send_replace(Some(verdict));

        event.map(|event| Fired {
            handler: state.handler,
            event,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigw_release_store::DataPlaneReleaseTask;

    struct NullHandler;

    impl CompletionHandler for NullHandler {
        fn on_task_finished(&self, _task: &DataPlaneReleaseTask, _outcome: &TaskOutcome) {}
        fn on_group_success(&self, _attempt_id: &AttemptId) {}
        fn on_group_failure(&self, _attempt_id: &AttemptId, _message: &str) {}
    }

    fn task(n: u8) -> TaskId {
        TaskId::from_bytes([n; 32])
    }

    fn ok() -> TaskOutcome {
        TaskOutcome::Succeeded {
            job_id: "job".to_string(),
        }
    }

    fn failed(message: &str) -> TaskOutcome {
        TaskOutcome::Failed {
            message: message.to_string(),
        }
    }

    fn register(tracker: &GroupTracker, attempt: AttemptId, expected: usize) -> watch::Receiver<Option<GroupVerdict>> {
        match tracker.register(attempt, expected, None, Arc::new(NullHandler)) {
            Registration::New(rx) => rx,
            Registration::Existing(_) => panic!("expected a new group"),
        }
    }

    #[test]
    fn success_fires_once_after_every_task() {
        let tracker = GroupTracker::new();
        let attempt = AttemptId::from_bytes([1u8; 32]);
        let rx = register(&tracker, attempt, 3);

        assert!(tracker.record(&attempt, &task(1), &ok()).is_none());
        assert!(tracker.record(&attempt, &task(2), &ok()).is_none());
        let fired = tracker.record(&attempt, &task(3), &ok()).unwrap();
        assert_eq!(fired.event, GroupEvent::Succeeded);
        assert_eq!(*rx.borrow(), Some(GroupVerdict::Success));
        assert!(tracker.is_empty());
    }

    #[test]
    fn first_failure_wins_in_any_order() {
        let orders: [[u8; 3]; 3] = [[1, 2, 3], [3, 2, 1], [2, 3, 1]];

        for order in orders {
            let tracker = GroupTracker::new();
            let attempt = AttemptId::from_bytes([2u8; 32]);
            let rx = register(&tracker, attempt, 3);

            let mut failures = Vec::new();
            let mut successes = 0;
            for n in order {
                let outcome = if n == 2 { failed("dp-2 unreachable") } else { ok() };
                match tracker.record(&attempt, &task(n), &outcome).map(|f| f.event) {
                    Some(GroupEvent::Failed(message)) => failures.push(message),
                    Some(GroupEvent::Succeeded) => successes += 1,
                    None => {}
                }
            }

            assert_eq!(failures, vec!["dp-2 unreachable".to_string()]);
            assert_eq!(successes, 0);
            assert_eq!(
                *rx.borrow(),
                Some(GroupVerdict::Failure("dp-2 unreachable".to_string()))
            );
        }
    }

    #[test]
    fn later_failures_do_not_fire() {
        let tracker = GroupTracker::new();
        let attempt = AttemptId::from_bytes([3u8; 32]);
        let rx = register(&tracker, attempt, 2);

        let first = tracker.record(&attempt, &task(1), &failed("first")).unwrap();
        assert_eq!(first.event, GroupEvent::Failed("first".to_string()));
        assert!(tracker.record(&attempt, &task(2), &failed("second")).is_none());
        assert_eq!(*rx.borrow(), Some(GroupVerdict::Failure("first".to_string())));
    }

    #[test]
    fn duplicate_outcomes_are_ignored() {
        let tracker = GroupTracker::new();
        let attempt = AttemptId::from_bytes([4u8; 32]);
        let _rx = register(&tracker, attempt, 2);

        assert!(tracker.record(&attempt, &task(1), &ok()).is_none());
        assert!(tracker.record(&attempt, &task(1), &ok()).is_none());
        assert!(tracker.is_tracking(&attempt));
    }

    #[test]
    fn group_is_not_registered_twice() {
        let tracker = GroupTracker::new();
        let attempt = AttemptId::from_bytes([5u8; 32]);
        let _rx = register(&tracker, attempt, 1);

        assert!(matches!(
            tracker.register(attempt, 1, None, Arc::new(NullHandler)),
            Registration::Existing(_)
        ));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn prior_failure_settles_as_failure_without_refiring() {
        let tracker = GroupTracker::new();
        let attempt = AttemptId::from_bytes([6u8; 32]);
        let rx = match tracker.register(attempt, 1, Some("earlier run".to_string()), Arc::new(NullHandler)) {
            Registration::New(rx) => rx,
            Registration::Existing(_) => panic!("expected a new group"),
        };

        assert!(tracker.record(&attempt, &task(1), &ok()).is_none());
        assert_eq!(
            *rx.borrow(),
            Some(GroupVerdict::Failure("earlier run".to_string()))
        );
    }

    #[test]
    fn untracked_group_is_ignored() {
        let tracker = GroupTracker::new();
        let attempt = AttemptId::from_bytes([7u8; 32]);
        assert!(tracker.record(&attempt, &task(1), &ok()).is_none());
    }
}
