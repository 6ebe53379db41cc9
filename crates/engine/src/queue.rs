use std::collections::HashSet;
use std::sync::Arc;

use tripledger_core::{Collection, MutationOp, OpId, PendingMutation, RecordId, SyncStatus};
use tripledger_storage::{LocalStore, StorageError};

/// The durable FIFO of writes the server has not confirmed yet.
///
/// Backed by the local store, so it survives restarts. Anyone may read or
/// append; only the sync coordinator acknowledges (removes) entries.
#[derive(Clone)]
pub struct MutationQueue {
    store: Arc<dyn LocalStore>,
}

impl MutationQueue {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    pub fn enqueue(&self, mutation: &PendingMutation) -> Result<(), StorageError> {
        self.store.append_mutation(mutation)
    }

    /// Every queued mutation, oldest first.
    pub fn pending(&self) -> Result<Vec<PendingMutation>, StorageError> {
        self.store.pending_mutations()
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        self.store.pending_count()
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Ids in `collection` that have a queued delete, including the server
    /// ids that queued temp ids have since been reconciled to.
    pub fn pending_deletes(&self, collection: Collection) -> Result<HashSet<RecordId>, StorageError> {
        self.targets_where(collection, |m| m.operation == MutationOp::Delete)
    }

    /// Ids in `collection` with any queued mutation.
    pub fn pending_targets(&self, collection: Collection) -> Result<HashSet<RecordId>, StorageError> {
        self.targets_where(collection, |_| true)
    }

    fn targets_where(
        &self,
        collection: Collection,
        keep: impl Fn(&PendingMutation) -> bool,
    ) -> Result<HashSet<RecordId>, StorageError> {
        let mut ids = HashSet::new();
        for m in self.pending()? {
            if m.entity_kind.collection() != collection || !keep(&m) {
                continue;
            }
            if m.target.is_temporary() {
                if let Some(server_id) = self.store.resolve_id(&m.target)? {
                    ids.insert(server_id);
                }
            }
            ids.insert(m.target);
        }
        Ok(ids)
    }

    /// Where `id` stands with the server, judged from its queued mutations.
    /// A queued create dominates; otherwise the latest mutation decides.
    pub fn status_of(&self, collection: Collection, id: &RecordId) -> Result<SyncStatus, StorageError> {
        let mut status = SyncStatus::Synced;
        for m in self.pending()? {
            if m.entity_kind.collection() != collection {
                continue;
            }
            let matches = m.target == *id
                || (m.target.is_temporary()
                    && self.store.resolve_id(&m.target)?.as_ref() == Some(id));
            if !matches {
                continue;
            }
            if status != SyncStatus::PendingCreate {
                status = m.operation.sync_status();
            }
        }
        Ok(status)
    }

    pub(crate) fn acknowledge(&self, op_id: OpId) -> Result<bool, StorageError> {
        self.store.remove_mutation(op_id)
    }
}
