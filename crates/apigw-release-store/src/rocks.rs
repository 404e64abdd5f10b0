//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use apigw_release_core::{
    AttemptId, DataPlaneId, GatewayId, HistoryId, ResourceVersionId, StageId, TaskId,
};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{
    DataPlane, DataPlaneReleaseTask, Gateway, GatewayDataPlaneBinding, HistoryStatus,
    PublishAttempt, Release, ReleaseHistory, ResourceVersion, Stage, TaskStatus,
};
use crate::write::{WriteOp, WriteSet};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    /// Serializes read-modify-write sequences (status updates, release
    /// compare-and-set, create-if-absent batches).
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_record<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put_record<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let value = Self::serialize(value)?;

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn exists(&self, cf_name: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf(cf_name)?;

        Ok(self
            .db
            .get_pinned_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some())
    }

    /// Collect every `(key, value)` pair whose key starts with `prefix`.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf(cf_name)?;

        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            // Stop if we're past the prefix
            if !key.starts_with(prefix) {
                break;
            }

            entries.push((key, value));
        }

        Ok(entries)
    }

    /// Resolve the children of an attempt index into records.
    fn list_attempt_children<T: serde::de::DeserializeOwned>(
        &self,
        index_cf: &str,
        record_cf: &str,
        attempt_id: &AttemptId,
    ) -> Result<Vec<T>> {
        let mut records = Vec::new();

        for (key, _) in self.scan_prefix(index_cf, attempt_id.as_bytes())? {
            let child = keys::extract_child_from_attempt_key(&key);
            if let Some(record) = self.get_record(record_cf, &keys::digest_key(&child))? {
                records.push(record);
            }
        }

        Ok(records)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Configuration
    // =========================================================================

    fn put_gateway(&self, gateway: &Gateway) -> Result<()> {
        self.put_record(cf::GATEWAYS, &keys::gateway_key(gateway.id), gateway)
    }

    fn get_gateway(&self, gateway_id: GatewayId) -> Result<Option<Gateway>> {
        self.get_record(cf::GATEWAYS, &keys::gateway_key(gateway_id))
    }

    fn put_stage(&self, stage: &Stage) -> Result<()> {
        self.put_record(cf::STAGES, &keys::stage_key(stage.id), stage)
    }

    fn get_stage(&self, stage_id: StageId) -> Result<Option<Stage>> {
        self.get_record(cf::STAGES, &keys::stage_key(stage_id))
    }

    fn put_resource_version(&self, version: &ResourceVersion) -> Result<()> {
        self.put_record(
            cf::RESOURCE_VERSIONS,
            &keys::numeric_key(version.id.to_be_bytes()),
            version,
        )
    }

    fn get_resource_version(&self, id: ResourceVersionId) -> Result<Option<ResourceVersion>> {
        self.get_record(cf::RESOURCE_VERSIONS, &keys::numeric_key(id.to_be_bytes()))
    }

    fn put_data_plane(&self, data_plane: &DataPlane) -> Result<()> {
        self.put_record(
            cf::DATA_PLANES,
            &keys::numeric_key(data_plane.id.to_be_bytes()),
            data_plane,
        )
    }

    fn get_data_plane(&self, data_plane_id: DataPlaneId) -> Result<Option<DataPlane>> {
        self.get_record(cf::DATA_PLANES, &keys::numeric_key(data_plane_id.to_be_bytes()))
    }

    fn put_binding(&self, binding: &GatewayDataPlaneBinding) -> Result<()> {
        self.put_record(
            cf::BINDINGS,
            &keys::binding_key(binding.gateway_id, binding.data_plane_id),
            binding,
        )
    }

    fn list_bindings(&self, gateway_id: GatewayId) -> Result<Vec<GatewayDataPlaneBinding>> {
        self.scan_prefix(cf::BINDINGS, &keys::gateway_key(gateway_id))?
            .iter()
            .map(|(_, value)| Self::deserialize(value))
            .collect()
    }

    // =========================================================================
    // Releases
    // =========================================================================

    fn get_release(&self, gateway_id: GatewayId, stage_id: StageId) -> Result<Option<Release>> {
        self.get_record(cf::RELEASES, &keys::release_key(gateway_id, stage_id))
    }

    fn list_releases(
        &self,
        gateway_id: GatewayId,
        stage_id: Option<StageId>,
    ) -> Result<Vec<Release>> {
        if let Some(stage_id) = stage_id {
            return Ok(self.get_release(gateway_id, stage_id)?.into_iter().collect());
        }

        self.scan_prefix(cf::RELEASES, &keys::gateway_key(gateway_id))?
            .iter()
            .map(|(_, value)| Self::deserialize(value))
            .collect()
    }

    fn upsert_release(&self, release: &Release) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let key = keys::release_key(release.gateway_id, release.stage_id);

        if let Some(current) = self.get_record::<Release>(cf::RELEASES, &key)? {
            if current.released_at > release.released_at {
                tracing::debug!(
                    gateway_id = %release.gateway_id,
                    stage_id = %release.stage_id,
                    current = %current.resource_version_id,
                    ignored = %release.resource_version_id,
                    "Ignored release upsert from an older history row"
                );
                return Ok(false);
            }
        }

        self.put_record(cf::RELEASES, &key, release)?;
        Ok(true)
    }

    // =========================================================================
    // History rows, tasks and attempts
    // =========================================================================

    fn apply(&self, writes: &WriteSet) -> Result<()> {
        let cf_histories = self.cf(cf::HISTORIES)?;
        let cf_by_stage = self.cf(cf::HISTORIES_BY_STAGE)?;
        let cf_by_attempt = self.cf(cf::HISTORIES_BY_ATTEMPT)?;
        let cf_tasks = self.cf(cf::TASKS)?;
        let cf_tasks_by_attempt = self.cf(cf::TASKS_BY_ATTEMPT)?;
        let cf_attempts = self.cf(cf::ATTEMPTS)?;
        let cf_releases = self.cf(cf::RELEASES)?;

        let _guard = self.write_lock.lock();

        let mut batch = WriteBatch::default();
        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        let mut skipped = 0usize;

        for op in writes.iter() {
            match op {
                WriteOp::CreateHistory(history) => {
                    let key = keys::digest_key(history.id.as_bytes());
                    if seen.contains(&key) || self.exists(cf::HISTORIES, &key)? {
                        skipped += 1;
                        continue;
                    }
                    batch.put_cf(&cf_histories, &key, Self::serialize(history)?);
                    batch.put_cf(
                        &cf_by_stage,
                        keys::stage_history_key(
                            history.gateway_id,
                            history.stage_id,
                            history.created_time,
                            &history.id,
                        ),
                        [],
                    );
                    batch.put_cf(
                        &cf_by_attempt,
                        keys::attempt_child_key(&history.attempt_id, history.id.as_bytes()),
                        [],
                    );
                    seen.insert(key);
                }
                WriteOp::CreateTask(task) => {
                    let key = keys::task_key(&task.id);
                    if seen.contains(&key) || self.exists(cf::TASKS, &key)? {
                        skipped += 1;
                        continue;
                    }
                    batch.put_cf(&cf_tasks, &key, Self::serialize(task)?);
                    batch.put_cf(
                        &cf_tasks_by_attempt,
                        keys::attempt_child_key(&task.attempt_id, task.id.as_bytes()),
                        [],
                    );
                    seen.insert(key);
                }
                WriteOp::CreateAttempt(attempt) => {
                    let key = keys::digest_key(attempt.id.as_bytes());
                    if seen.contains(&key) || self.exists(cf::ATTEMPTS, &key)? {
                        skipped += 1;
                        continue;
                    }
                    batch.put_cf(&cf_attempts, &key, Self::serialize(attempt)?);
                    seen.insert(key);
                }
                WriteOp::DeleteRelease {
                    gateway_id,
                    stage_id,
                } => {
                    batch.delete_cf(&cf_releases, keys::release_key(*gateway_id, *stage_id));
                }
            }
        }

        if skipped > 0 {
            tracing::debug!(skipped, "Skipped records that already exist");
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_history(&self, history_id: &HistoryId) -> Result<Option<ReleaseHistory>> {
        self.get_record(cf::HISTORIES, &keys::digest_key(history_id.as_bytes()))
    }

    fn list_histories_by_stage(
        &self,
        gateway_id: GatewayId,
        stage_id: StageId,
    ) -> Result<Vec<ReleaseHistory>> {
        let prefix = keys::release_key(gateway_id, stage_id);

        let mut histories = Vec::new();
        for (key, _) in self.scan_prefix(cf::HISTORIES_BY_STAGE, &prefix)? {
            let history_id = keys::extract_history_id_from_stage_key(&key);
            if let Some(history) = self.get_history(&history_id)? {
                histories.push(history);
            }
        }

        Ok(histories)
    }

    fn list_histories_by_attempt(&self, attempt_id: &AttemptId) -> Result<Vec<ReleaseHistory>> {
        self.list_attempt_children(cf::HISTORIES_BY_ATTEMPT, cf::HISTORIES, attempt_id)
    }

    fn update_history_status(
        &self,
        history_id: &HistoryId,
        status: HistoryStatus,
        message: &str,
    ) -> Result<ReleaseHistory> {
        let _guard = self.write_lock.lock();
        let key = keys::digest_key(history_id.as_bytes());

        let mut history: ReleaseHistory = self
            .get_record(cf::HISTORIES, &key)?
            .ok_or(StoreError::NotFound)?;

        if history.status.is_terminal() {
            return Err(StoreError::Immutable(format!(
                "history {history_id} is already {:?}",
                history.status
            )));
        }

        history.status = status;
        history.message = message.to_string();
        history.updated_time = chrono::Utc::now();
        self.put_record(cf::HISTORIES, &key, &history)?;

        Ok(history)
    }

    fn get_task(&self, task_id: &TaskId) -> Result<Option<DataPlaneReleaseTask>> {
        self.get_record(cf::TASKS, &keys::task_key(task_id))
    }

    fn list_tasks_by_attempt(&self, attempt_id: &AttemptId) -> Result<Vec<DataPlaneReleaseTask>> {
        self.list_attempt_children(cf::TASKS_BY_ATTEMPT, cf::TASKS, attempt_id)
    }

    fn update_task_status(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        job_id: Option<&str>,
        message: &str,
    ) -> Result<DataPlaneReleaseTask> {
        let _guard = self.write_lock.lock();
        let key = keys::task_key(task_id);

        let mut task: DataPlaneReleaseTask =
            self.get_record(cf::TASKS, &key)?.ok_or(StoreError::NotFound)?;

        if task.status.is_terminal() {
            return Err(StoreError::Immutable(format!(
                "task {task_id} is already {:?}",
                task.status
            )));
        }

        task.status = status;
        if let Some(job_id) = job_id {
            task.job_id = Some(job_id.to_string());
        }
        task.message = message.to_string();
        task.updated_time = chrono::Utc::now();
        self.put_record(cf::TASKS, &key, &task)?;

        Ok(task)
    }

    fn get_attempt(&self, attempt_id: &AttemptId) -> Result<Option<PublishAttempt>> {
        self.get_record(cf::ATTEMPTS, &keys::digest_key(attempt_id.as_bytes()))
    }

    fn put_attempt(&self, attempt: &PublishAttempt) -> Result<()> {
        self.put_record(cf::ATTEMPTS, &keys::digest_key(attempt.id.as_bytes()), attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AttemptStatus, DataPlaneKind, GatewayStatus, HostingType, PublishSource, RolloutMechanism,
        StageStatus, TriggerPublishType,
    };
    use apigw_release_core::TaskIntent;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn create_test_history(attempt: &AttemptId, stage: u64, data_plane: u64) -> ReleaseHistory {
        let now = Utc::now();
        ReleaseHistory {
            id: HistoryId::derive(attempt, StageId::new(stage), DataPlaneId::new(data_plane)),
            attempt_id: *attempt,
            gateway_id: GatewayId::new(1),
            stage_id: StageId::new(stage),
            resource_version_id: ResourceVersionId::new(5),
            data_plane_id: DataPlaneId::new(data_plane),
            source: PublishSource::ManualPublish,
            status: HistoryStatus::Dispatched,
            message: String::new(),
            created_by: "admin".to_string(),
            created_time: now,
            updated_time: now,
            deprovision_operation_id: None,
        }
    }

    fn create_test_task(history: &ReleaseHistory) -> DataPlaneReleaseTask {
        DataPlaneReleaseTask {
            id: TaskId::derive(
                &history.attempt_id,
                history.stage_id,
                history.data_plane_id,
                TaskIntent::Deploy,
            ),
            history_id: Some(history.id),
            attempt_id: history.attempt_id,
            gateway_id: history.gateway_id,
            stage_id: history.stage_id,
            resource_version_id: history.resource_version_id,
            data_plane_id: history.data_plane_id,
            mechanism: RolloutMechanism::SharedRegistryPush,
            intent: TaskIntent::Deploy,
            status: TaskStatus::Queued,
            job_id: None,
            message: String::new(),
            created_time: history.created_time,
            updated_time: history.created_time,
        }
    }

    fn create_test_release(stage: u64, version: u64, released_at: chrono::DateTime<Utc>) -> Release {
        Release {
            gateway_id: GatewayId::new(1),
            stage_id: StageId::new(stage),
            resource_version_id: ResourceVersionId::new(version),
            history_id: None,
            released_at,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn config_records_roundtrip() {
        let (store, _dir) = create_test_store();

        let gateway = Gateway {
            id: GatewayId::new(1),
            name: "payments".to_string(),
            status: GatewayStatus::Active,
            hosting_type: HostingType::Micro,
        };
        store.put_gateway(&gateway).unwrap();
        let retrieved = store.get_gateway(GatewayId::new(1)).unwrap().unwrap();
        assert_eq!(retrieved.name, "payments");
        assert_eq!(retrieved.hosting_type, HostingType::Micro);

        let stage = Stage {
            id: StageId::new(3),
            gateway_id: GatewayId::new(1),
            name: "prod".to_string(),
            status: StageStatus::Active,
            backends: Vec::new(),
            vars: std::collections::BTreeMap::from([("region".to_string(), "eu".to_string())]),
        };
        store.put_stage(&stage).unwrap();
        let retrieved = store.get_stage(StageId::new(3)).unwrap().unwrap();
        assert_eq!(retrieved.vars.get("region").map(String::as_str), Some("eu"));

        assert!(store.get_gateway(GatewayId::new(2)).unwrap().is_none());
    }

    #[test]
    fn bindings_are_listed_per_gateway() {
        let (store, _dir) = create_test_store();

        for (gateway, data_plane, active) in [(1, 10, true), (1, 11, false), (2, 10, true)] {
            store
                .put_binding(&GatewayDataPlaneBinding {
                    gateway_id: GatewayId::new(gateway),
                    data_plane_id: DataPlaneId::new(data_plane),
                    active,
                })
                .unwrap();
        }
        store
            .put_data_plane(&DataPlane {
                id: DataPlaneId::new(10),
                name: "bj-1".to_string(),
                kind: DataPlaneKind::Shared,
            })
            .unwrap();

        let bindings = store.list_bindings(GatewayId::new(1)).unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].data_plane_id, DataPlaneId::new(10));
        assert!(!bindings[1].active);

        assert_eq!(store.list_bindings(GatewayId::new(2)).unwrap().len(), 1);
        assert!(store.get_data_plane(DataPlaneId::new(10)).unwrap().is_some());
    }

    #[test]
    fn release_upsert_ignores_older_rows() {
        let (store, _dir) = create_test_store();
        let now = Utc::now();

        assert!(store.upsert_release(&create_test_release(1, 5, now)).unwrap());
        assert!(!store
            .upsert_release(&create_test_release(1, 4, now - Duration::seconds(10)))
            .unwrap());
        assert_eq!(
            store
                .get_release(GatewayId::new(1), StageId::new(1))
                .unwrap()
                .unwrap()
                .resource_version_id,
            ResourceVersionId::new(5)
        );

        assert!(store
            .upsert_release(&create_test_release(1, 6, now + Duration::seconds(10)))
            .unwrap());
        assert_eq!(store.list_releases(GatewayId::new(1), None).unwrap().len(), 1);
    }

    #[test]
    fn list_releases_narrowed_to_stage() {
        let (store, _dir) = create_test_store();
        let now = Utc::now();
        store.upsert_release(&create_test_release(1, 5, now)).unwrap();
        store.upsert_release(&create_test_release(2, 5, now)).unwrap();

        assert_eq!(store.list_releases(GatewayId::new(1), None).unwrap().len(), 2);
        let narrowed = store
            .list_releases(GatewayId::new(1), Some(StageId::new(2)))
            .unwrap();
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].stage_id, StageId::new(2));
        assert!(store
            .list_releases(GatewayId::new(1), Some(StageId::new(9)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn apply_is_create_if_absent() {
        let (store, _dir) = create_test_store();
        let attempt = AttemptId::from_key(GatewayId::new(1), "apply");
        let history = create_test_history(&attempt, 1, 10);
        let task = create_test_task(&history);

        let mut writes = WriteSet::new();
        writes.push(WriteOp::CreateHistory(history.clone()));
        writes.push(WriteOp::CreateTask(task.clone()));
        store.apply(&writes).unwrap();

        store
            .update_history_status(&history.id, HistoryStatus::Success, "")
            .unwrap();

        // Re-applying the same writes must not reset the terminal row.
        store.apply(&writes).unwrap();
        let stored = store.get_history(&history.id).unwrap().unwrap();
        assert_eq!(stored.status, HistoryStatus::Success);

        assert_eq!(store.list_histories_by_attempt(&attempt).unwrap().len(), 1);
        assert_eq!(store.list_tasks_by_attempt(&attempt).unwrap().len(), 1);
        assert_eq!(
            store
                .list_histories_by_stage(GatewayId::new(1), StageId::new(1))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn apply_deletes_releases() {
        let (store, _dir) = create_test_store();
        store.upsert_release(&create_test_release(1, 5, Utc::now())).unwrap();

        let mut writes = WriteSet::new();
        writes.push(WriteOp::DeleteRelease {
            gateway_id: GatewayId::new(1),
            stage_id: StageId::new(1),
        });
        store.apply(&writes).unwrap();

        assert!(store
            .get_release(GatewayId::new(1), StageId::new(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn terminal_history_is_immutable() {
        let (store, _dir) = create_test_store();
        let attempt = AttemptId::from_key(GatewayId::new(1), "immutable");
        let history = create_test_history(&attempt, 1, 10);

        let mut writes = WriteSet::new();
        writes.push(WriteOp::CreateHistory(history.clone()));
        store.apply(&writes).unwrap();

        let updated = store
            .update_history_status(&history.id, HistoryStatus::Failure, "upstream timeout")
            .unwrap();
        assert_eq!(updated.message, "upstream timeout");

        let result = store.update_history_status(&history.id, HistoryStatus::Success, "");
        assert!(matches!(result, Err(StoreError::Immutable(_))));

        let missing = HistoryId::from_bytes([9u8; 32]);
        let result = store.update_history_status(&missing, HistoryStatus::Success, "");
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[test]
    fn task_status_records_job_id() {
        let (store, _dir) = create_test_store();
        let attempt = AttemptId::from_key(GatewayId::new(1), "task");
        let history = create_test_history(&attempt, 1, 10);
        let task = create_test_task(&history);

        let mut writes = WriteSet::new();
        writes.push(WriteOp::CreateTask(task.clone()));
        store.apply(&writes).unwrap();

        store
            .update_task_status(&task.id, TaskStatus::Running, Some("job-17"), "")
            .unwrap();
        let done = store
            .update_task_status(&task.id, TaskStatus::Succeeded, None, "")
            .unwrap();
        assert_eq!(done.job_id.as_deref(), Some("job-17"));

        let result = store.update_task_status(&task.id, TaskStatus::Failed, None, "late");
        assert!(matches!(result, Err(StoreError::Immutable(_))));
    }

    #[test]
    fn attempt_roundtrip() {
        let (store, _dir) = create_test_store();
        let attempt_id = AttemptId::from_key(GatewayId::new(1), "attempt");
        let mut attempt = PublishAttempt {
            id: attempt_id,
            gateway_id: GatewayId::new(1),
            source: PublishSource::CliSync,
            trigger: TriggerPublishType::RollingUpdate,
            status: AttemptStatus::Dispatched,
            expected_tasks: 2,
            succeeded: 0,
            failed: 0,
            message: String::new(),
            created_by: "ci".to_string(),
            created_time: Utc::now(),
            finished_time: None,
        };

        let mut writes = WriteSet::new();
        writes.push(WriteOp::CreateAttempt(attempt.clone()));
        store.apply(&writes).unwrap();

        attempt.status = AttemptStatus::Success;
        attempt.succeeded = 2;
        store.put_attempt(&attempt).unwrap();

        let stored = store.get_attempt(&attempt_id).unwrap().unwrap();
        assert_eq!(stored.status, AttemptStatus::Success);
        assert_eq!(stored.succeeded, 2);
    }
}
