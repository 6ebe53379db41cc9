use tripledger_core::{Collection, EntityRecord, OpId, PendingMutation, RecordId};

use crate::error::StorageError;

/// The local effect of an offline write, committed together with its
/// queue entry.
#[derive(Debug, Clone, Copy)]
pub enum LocalWrite<'a> {
    Put(&'a EntityRecord),
    Remove(&'a RecordId),
}

/// Durable, typed key-value persistence: one map from id to record per
/// named collection, plus the pending-mutation queue.
///
/// Writes do not compare recency: the last `put_many` for an id simply
/// overwrites. Recency is only consulted on the read side.
pub trait LocalStore: Send + Sync {
    /// Create the collections if missing. Idempotent.
    fn init_db(&self) -> Result<(), StorageError>;

    fn get_all(&self, collection: Collection) -> Result<Vec<EntityRecord>, StorageError>;

    fn get(
        &self,
        collection: Collection,
        id: &RecordId,
    ) -> Result<Option<EntityRecord>, StorageError>;

    /// Upsert by id.
    fn put_many(
        &self,
        collection: Collection,
        records: &[EntityRecord],
    ) -> Result<(), StorageError>;

    /// Returns whether a record was removed.
    fn delete(&self, collection: Collection, id: &RecordId) -> Result<bool, StorageError>;

    /// Apply an optimistic local write and append its mutation atomically.
    fn commit_offline(
        &self,
        collection: Collection,
        write: LocalWrite<'_>,
        mutation: &PendingMutation,
    ) -> Result<(), StorageError>;

    // ------------------------------------------------------------------
    // Mutation queue
    // ------------------------------------------------------------------

    fn append_mutation(&self, mutation: &PendingMutation) -> Result<(), StorageError>;

    /// All queued mutations in insertion order.
    fn pending_mutations(&self) -> Result<Vec<PendingMutation>, StorageError>;

    fn remove_mutation(&self, op_id: OpId) -> Result<bool, StorageError>;

    fn pending_count(&self) -> Result<usize, StorageError>;

    // ------------------------------------------------------------------
    // Id reconciliation
    // ------------------------------------------------------------------

    /// Settle a replayed create in one transaction: replace the record stored
    /// under `temp_id` with `record` (which carries the server id), remember
    /// the mapping and drop the create mutation `op_id` from the queue.
    fn reconcile_create(
        &self,
        collection: Collection,
        temp_id: &RecordId,
        record: &EntityRecord,
        op_id: OpId,
    ) -> Result<(), StorageError>;

    /// Server id previously recorded for a temporary id.
    fn resolve_id(&self, temp_id: &RecordId) -> Result<Option<RecordId>, StorageError>;

    // ------------------------------------------------------------------
    // Sync bookkeeping
    // ------------------------------------------------------------------

    fn last_synced(&self, collection: Collection) -> Result<Option<u64>, StorageError>;

    fn set_last_synced(&self, collection: Collection, at_ms: u64) -> Result<(), StorageError>;
}
