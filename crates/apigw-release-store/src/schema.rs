//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Gateway records, keyed by `gateway_id`.
    pub const GATEWAYS: &str = "gateways";

    /// Stage records, keyed by `stage_id`.
    pub const STAGES: &str = "stages";

    /// Resource version snapshots, keyed by `resource_version_id`.
    pub const RESOURCE_VERSIONS: &str = "resource_versions";

    /// Data plane records, keyed by `data_plane_id`.
    pub const DATA_PLANES: &str = "data_planes";

    /// Gateway to data plane bindings, keyed by `gateway_id || data_plane_id`.
    pub const BINDINGS: &str = "bindings";

    /// Current releases, keyed by `gateway_id || stage_id`.
    pub const RELEASES: &str = "releases";

    /// History rows, keyed by `history_id`.
    pub const HISTORIES: &str = "histories";

    /// Index: history rows by stage, keyed by
    /// `gateway_id || stage_id || created_millis || history_id`.
    pub const HISTORIES_BY_STAGE: &str = "histories_by_stage";

    /// Index: history rows by attempt, keyed by `attempt_id || history_id`.
    pub const HISTORIES_BY_ATTEMPT: &str = "histories_by_attempt";

    /// Rollout tasks, keyed by `task_id`.
    pub const TASKS: &str = "tasks";

    /// Index: tasks by attempt, keyed by `attempt_id || task_id`.
    pub const TASKS_BY_ATTEMPT: &str = "tasks_by_attempt";

    /// Attempt aggregates, keyed by `attempt_id`.
    pub const ATTEMPTS: &str = "attempts";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::GATEWAYS,
        cf::STAGES,
        cf::RESOURCE_VERSIONS,
        cf::DATA_PLANES,
        cf::BINDINGS,
        cf::RELEASES,
        cf::HISTORIES,
        cf::HISTORIES_BY_STAGE,
        cf::HISTORIES_BY_ATTEMPT,
        cf::TASKS,
        cf::TASKS_BY_ATTEMPT,
        cf::ATTEMPTS,
    ]
}
