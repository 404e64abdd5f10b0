//! Key encoding utilities for `RocksDB`.
//!
//! Numeric identifiers are encoded big-endian so that prefix scans return
//! records in key order. All index keys end with the primary key of the
//! record they point to.

use apigw_release_core::{AttemptId, DataPlaneId, GatewayId, HistoryId, StageId, TaskId};
use chrono::{DateTime, Utc};

/// Encode a gateway key.
#[must_use]
pub fn gateway_key(gateway_id: GatewayId) -> Vec<u8> {
    gateway_id.to_be_bytes().to_vec()
}

/// Encode a stage key.
#[must_use]
pub fn stage_key(stage_id: StageId) -> Vec<u8> {
    stage_id.to_be_bytes().to_vec()
}

/// Encode a numeric key from its big-endian bytes.
#[must_use]
pub fn numeric_key(bytes: [u8; 8]) -> Vec<u8> {
    bytes.to_vec()
}

/// Encode a binding key: `gateway_id || data_plane_id`.
#[must_use]
pub fn binding_key(gateway_id: GatewayId, data_plane_id: DataPlaneId) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&gateway_id.to_be_bytes());
    key.extend_from_slice(&data_plane_id.to_be_bytes());
    key
}

/// Encode a release key: `gateway_id || stage_id`.
#[must_use]
pub fn release_key(gateway_id: GatewayId, stage_id: StageId) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&gateway_id.to_be_bytes());
    key.extend_from_slice(&stage_id.to_be_bytes());
    key
}

/// Encode a history-by-stage index key:
/// `gateway_id || stage_id || created_millis || history_id`.
///
/// Keys sort by creation time within a stage.
#[must_use]
pub fn stage_history_key(
    gateway_id: GatewayId,
    stage_id: StageId,
    created_time: DateTime<Utc>,
    history_id: &HistoryId,
) -> Vec<u8> {
    let millis = u64::try_from(created_time.timestamp_millis()).unwrap_or(0);
    let mut key = Vec::with_capacity(56);
    key.extend_from_slice(&release_key(gateway_id, stage_id));
    key.extend_from_slice(&millis.to_be_bytes());
    key.extend_from_slice(history_id.as_bytes());
    key
}

/// Extract the history ID from a history-by-stage key.
///
/// # Panics
///
/// Panics if the key is not at least 56 bytes.
#[must_use]
pub fn extract_history_id_from_stage_key(key: &[u8]) -> HistoryId {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&key[24..56]);
    HistoryId::from_bytes(bytes)
}

/// Encode an attempt-child index key: `attempt_id || child_id`.
#[must_use]
pub fn attempt_child_key(attempt_id: &AttemptId, child: &[u8; 32]) -> Vec<u8> {
    let mut key = Vec::with_capacity(64);
    key.extend_from_slice(attempt_id.as_bytes());
    key.extend_from_slice(child);
    key
}

/// Extract the trailing 32-byte child ID from an attempt-child key.
///
/// # Panics
///
/// Panics if the key is not at least 64 bytes.
#[must_use]
pub fn extract_child_from_attempt_key(key: &[u8]) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&key[32..64]);
    bytes
}

/// Encode a digest key (history, task or attempt).
#[must_use]
pub fn digest_key(id: &[u8; 32]) -> Vec<u8> {
    id.to_vec()
}

/// Encode a task key.
#[must_use]
pub fn task_key(task_id: &TaskId) -> Vec<u8> {
    digest_key(task_id.as_bytes())
}
