//! Terminal rendering of dispatch results.

use apigw_release_control::TargetOutcome;
use apigw_release_store::{
    DataPlaneReleaseTask, HistoryStatus, PublishAttempt, ReleaseHistory, TaskStatus,
};

/// Final state of one target, read back from the store after the dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLine {
    pub stage: String,
    pub data_plane: String,
    pub status: &'static str,
    pub message: String,
}

impl TargetLine {
    pub fn is_failure(&self) -> bool {
        self.status == "failure"
    }
}

pub const fn history_label(status: HistoryStatus) -> &'static str {
    match status {
        HistoryStatus::Pending => "pending",
        HistoryStatus::Validating => "validating",
        HistoryStatus::Dispatched => "dispatched",
        HistoryStatus::Success => "success",
        HistoryStatus::Failure => "failure",
    }
}

pub const fn task_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "queued",
        TaskStatus::Running => "running",
        TaskStatus::Succeeded => "success",
        TaskStatus::Failed => "failure",
    }
}

/// Build the line of one target.
///
/// The stored history row wins over the task, and both win over the
/// in-call outcome.
pub fn target_line(
    outcome: &TargetOutcome,
    history: Option<&ReleaseHistory>,
    task: Option<&DataPlaneReleaseTask>,
) -> TargetLine {
    let (status, message) = match (history, task) {
        (Some(history), _) => (history_label(history.status), history.message.clone()),
        (None, Some(task)) => (task_label(task.status), task.message.clone()),
        (None, None) => (history_label(outcome.status), outcome.message.clone()),
    };

    TargetLine {
        stage: outcome.stage_id.to_string(),
        data_plane: outcome
            .data_plane_id
            .map_or_else(|| "-".to_string(), |id| id.to_string()),
        status,
        message,
    }
}

pub fn format_line(line: &TargetLine) -> String {
    if line.message.is_empty() {
        format!("stage={} data_plane={} {}", line.stage, line.data_plane, line.status)
    } else {
        format!(
            "stage={} data_plane={} {}: {}",
            line.stage, line.data_plane, line.status, line.message
        )
    }
}

pub fn format_attempt(attempt: &PublishAttempt) -> String {
    let mut line = format!(
        "attempt={} gateway={} source={} status={:?} tasks={}/{} failed={}",
        attempt.id,
        attempt.gateway_id,
        attempt.source,
        attempt.status,
        attempt.succeeded,
        attempt.expected_tasks,
        attempt.failed,
    );
    if !attempt.message.is_empty() {
        line.push_str(&format!(" message={:?}", attempt.message));
    }
    line
}
