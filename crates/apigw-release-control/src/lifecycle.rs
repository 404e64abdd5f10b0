//! History row state machine.
//!
//! This module defines the valid status transitions of a `ReleaseHistory`
//! row and the helpers flows use to move a row along them.
//!
//! # State Machine
//!
//! ```text
//!                  ┌───────────┐
//!                  │  Pending  │───────────────┐
//!                  └─────┬─────┘               │ (flows without validation)
//!                        │                     │
//!          ┌─────────────┼──────────────┐      │
//!          │ (validate)  │ (no target)  │      │
//!          ▼             ▼              │      │
//!   ┌────────────┐  ┌─────────┐         │      │
//!   │ Validating │─▶│ Failure │◄──┐     │      │
//!   └─────┬──────┘  └─────────┘   │     │      │
//!         │                       │     │      │
//!         ▼                       │     │      │
//!   ┌────────────┐                │     │      │
//!   │ Dispatched │◄───────────────┼─────┴──────┘
//!   └─────┬──────┘   (task failed)│
//!         │───────────────────────┘
//!         ▼
//!   ┌────────────┐
//!   │  Success   │
//!   └────────────┘
//! ```
//!
//! `Pending` and `Validating` only exist in memory during one dispatch call.
//! Rows reach the store as `Dispatched` or `Failure`.

use apigw_release_store::{HistoryStatus, ReleaseHistory};
use chrono::Utc;

use crate::error::{PublishError, Result};

/// Validates a status transition and returns the target status if valid.
///
/// # Errors
///
/// Returns `PublishError::InvalidTransition` if the transition is not allowed.
pub fn validate_transition(
    history: &ReleaseHistory,
    to: HistoryStatus,
) -> Result<HistoryStatus> {
    if is_valid_transition(history.status, to) {
        Ok(to)
    } else {
        Err(PublishError::InvalidTransition {
            history_id: history.id,
            from: history.status,
            to,
        })
    }
}

/// Check if a status transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: HistoryStatus, to: HistoryStatus) -> bool {
    use HistoryStatus::{Dispatched, Failure, Pending, Success, Validating};

    matches!(
        (from, to),
        (Pending, Validating | Dispatched | Failure)
            | (Validating, Dispatched | Failure)
            | (Dispatched, Success | Failure)
    )
}

/// Returns the list of valid target statuses from the given status.
#[must_use]
pub fn valid_transitions_from(status: HistoryStatus) -> Vec<HistoryStatus> {
    use HistoryStatus::{Dispatched, Failure, Pending, Success, Validating};

    match status {
        Pending => vec![Validating, Dispatched, Failure],
        Validating => vec![Dispatched, Failure],
        Dispatched => vec![Success, Failure],
        Success | Failure => Vec::new(),
    }
}

/// Move an in-memory row to `to`, replacing its message.
///
/// # Errors
///
/// Returns `PublishError::InvalidTransition` if the transition is not allowed;
/// the row is left untouched.
pub fn advance(history: &mut ReleaseHistory, to: HistoryStatus, message: &str) -> Result<()> {
    validate_transition(history, to)?;
    history.status = to;
    history.message = message.to_string();
    history.updated_time = Utc::now();
    Ok(())
}

/// Returns true if a row in this status may be committed.
#[must_use]
pub const fn is_committable(status: HistoryStatus) -> bool {
    matches!(status, HistoryStatus::Dispatched | HistoryStatus::Failure)
}
