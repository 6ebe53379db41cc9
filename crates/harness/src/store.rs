use std::sync::atomic::{AtomicBool, Ordering};

use tripledger_core::{Collection, EntityRecord, OpId, PendingMutation, RecordId};
use tripledger_storage::{LocalStore, LocalWrite, SqliteStore, StorageError};

/// In-memory SQLite store whose individual operations can be made to fail.
pub struct FlakyStore {
    inner: SqliteStore,
    fail_get: AtomicBool,
    fail_reconcile: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            inner: SqliteStore::open_in_memory()?,
            fail_get: AtomicBool::new(false),
            fail_reconcile: AtomicBool::new(false),
        })
    }

    /// Single-record reads fail while set.
    pub fn fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    /// `reconcile_create` fails while set, leaving the store untouched.
    pub fn fail_reconcile(&self, fail: bool) {
        self.fail_reconcile.store(fail, Ordering::SeqCst);
    }

    fn injected(op: &str) -> StorageError {
        StorageError::Unavailable(format!("injected {op} failure"))
    }
}

impl LocalStore for FlakyStore {
    fn init_db(&self) -> Result<(), StorageError> {
        self.inner.init_db()
    }

    fn get_all(&self, collection: Collection) -> Result<Vec<EntityRecord>, StorageError> {
        self.inner.get_all(collection)
    }

    fn get(
        &self,
        collection: Collection,
        id: &RecordId,
    ) -> Result<Option<EntityRecord>, StorageError> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(Self::injected("get"));
        }
        self.inner.get(collection, id)
    }

    fn put_many(&self, collection: Collection, records: &[EntityRecord]) -> Result<(), StorageError> {
        self.inner.put_many(collection, records)
    }

    fn delete(&self, collection: Collection, id: &RecordId) -> Result<bool, StorageError> {
        self.inner.delete(collection, id)
    }

    fn commit_offline(
        &self,
        collection: Collection,
        write: LocalWrite<'_>,
        mutation: &PendingMutation,
    ) -> Result<(), StorageError> {
        self.inner.commit_offline(collection, write, mutation)
    }

    fn append_mutation(&self, mutation: &PendingMutation) -> Result<(), StorageError> {
        self.inner.append_mutation(mutation)
    }

    fn pending_mutations(&self) -> Result<Vec<PendingMutation>, StorageError> {
        self.inner.pending_mutations()
    }

    fn remove_mutation(&self, op_id: OpId) -> Result<bool, StorageError> {
        self.inner.remove_mutation(op_id)
    }

    fn pending_count(&self) -> Result<usize, StorageError> {
        self.inner.pending_count()
    }

    fn reconcile_create(
        &self,
        collection: Collection,
        temp_id: &RecordId,
        record: &EntityRecord,
        op_id: OpId,
    ) -> Result<(), StorageError> {
        if self.fail_reconcile.load(Ordering::SeqCst) {
            return Err(Self::injected("reconcile"));
        }
        self.inner.reconcile_create(collection, temp_id, record, op_id)
    }

    fn resolve_id(&self, temp_id: &RecordId) -> Result<Option<RecordId>, StorageError> {
        self.inner.resolve_id(temp_id)
    }

    fn last_synced(&self, collection: Collection) -> Result<Option<u64>, StorageError> {
        self.inner.last_synced(collection)
    }

    fn set_last_synced(&self, collection: Collection, at_ms: u64) -> Result<(), StorageError> {
        self.inner.set_last_synced(collection, at_ms)
    }
}
