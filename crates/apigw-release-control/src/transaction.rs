//! Write-then-release transactions.
//!
//! A [`Transaction`] collects the records of one dispatch call together with
//! the work that must only start once those records exist. [`Transaction::commit`]
//! writes the records as one batch and hands the deferred work back; if the
//! write fails the work is dropped and nothing runs.

use apigw_release_store::{Store, WriteOp, WriteSet};

use crate::error::Result;

/// Records plus the work deferred until they are committed.
#[derive(Debug)]
pub struct Transaction<T> {
    writes: WriteSet,
    deferred: Vec<T>,
}

impl<T> Default for Transaction<T> {
    fn default() -> Self {
        Self {
            writes: WriteSet::new(),
            deferred: Vec::new(),
        }
    }
}

impl<T> Transaction<T> {
    /// Start an empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a write.
    pub fn record(&mut self, op: WriteOp) {
        self.writes.push(op);
    }

    /// Add work released after commit.
    pub fn defer(&mut self, item: T) {
        self.deferred.push(item);
    }

    /// Number of deferred items.
    #[must_use]
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// The pending writes.
    #[must_use]
    pub const fn writes(&self) -> &WriteSet {
        &self.writes
    }

    /// Write every record atomically and release the deferred work.
    ///
    /// # Errors
    ///
    /// Returns the store error; the deferred work is dropped.
    pub fn commit<S: Store + ?Sized>(self, store: &S) -> Result<Vec<T>> {
        if !self.writes.is_empty() {
            store.apply(&self.writes)?;
        }
        tracing::debug!(
            writes = self.writes.len(),
            deferred = self.deferred.len(),
            "Committed transaction"
        );
        Ok(self.deferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigw_release_core::{GatewayId, StageId};
    use apigw_release_store::{Release, RocksStore};
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn commit_releases_deferred_work() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        store
            .upsert_release(&Release {
                gateway_id: GatewayId::new(1),
                stage_id: StageId::new(1),
                resource_version_id: apigw_release_core::ResourceVersionId::new(3),
                history_id: None,
                released_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .unwrap();

        let mut tx = Transaction::new();
        tx.record(WriteOp::DeleteRelease {
            gateway_id: GatewayId::new(1),
            stage_id: StageId::new(1),
        });
        tx.defer("teardown dp-1");
        tx.defer("teardown dp-2");
        assert_eq!(tx.deferred_len(), 2);

        let released = tx.commit(&store).unwrap();
        assert_eq!(released, vec!["teardown dp-1", "teardown dp-2"]);
        assert!(store
            .get_release(GatewayId::new(1), StageId::new(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn empty_transaction_commits() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let tx: Transaction<u32> = Transaction::new();
        assert!(tx.commit(&store).unwrap().is_empty());
    }
}
