//! Atomic write sets.
//!
//! A [`WriteSet`] collects the records one orchestration call creates so the
//! store can commit them as a single `RocksDB` write batch.

use apigw_release_core::{GatewayId, StageId};

use crate::types::{DataPlaneReleaseTask, PublishAttempt, ReleaseHistory};

/// One write inside a [`WriteSet`].
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Create a history row unless one with the same id exists.
    CreateHistory(ReleaseHistory),
    /// Create a task unless one with the same id exists.
    CreateTask(DataPlaneReleaseTask),
    /// Create an attempt aggregate unless one with the same id exists.
    CreateAttempt(PublishAttempt),
    /// Remove the release pointer of a stage.
    DeleteRelease {
        /// The gateway.
        gateway_id: GatewayId,
        /// The stage.
        stage_id: StageId,
    },
}

/// An ordered list of writes applied atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    ops: Vec<WriteOp>,
}

impl WriteSet {
    /// Create an empty write set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a write.
    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    /// Number of writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Iterate over the writes in order.
    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.iter()
    }
}
