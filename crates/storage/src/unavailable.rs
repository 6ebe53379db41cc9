use std::sync::Arc;

use tracing::{error, info};
use tripledger_core::{Collection, EntityRecord, OpId, PendingMutation, RecordId};

use crate::error::StorageError;
use crate::sqlite::SqliteStore;
use crate::traits::{LocalStore, LocalWrite};

/// Stand-in used when the real store could not be opened. Every call fails
/// with [`StorageError::Unavailable`], so readers fall back to whatever the
/// server handed them and writers report a genuine failure.
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn err<T>(&self) -> Result<T, StorageError> {
        Err(StorageError::Unavailable(self.reason.clone()))
    }
}

impl LocalStore for UnavailableStore {
    fn init_db(&self) -> Result<(), StorageError> {
        self.err()
    }

    fn get_all(&self, _collection: Collection) -> Result<Vec<EntityRecord>, StorageError> {
        self.err()
    }

    fn get(
        &self,
        _collection: Collection,
        _id: &RecordId,
    ) -> Result<Option<EntityRecord>, StorageError> {
        self.err()
    }

    fn put_many(
        &self,
        _collection: Collection,
        _records: &[EntityRecord],
    ) -> Result<(), StorageError> {
        self.err()
    }

    fn delete(&self, _collection: Collection, _id: &RecordId) -> Result<bool, StorageError> {
        self.err()
    }

    fn commit_offline(
        &self,
        _collection: Collection,
        _write: LocalWrite<'_>,
        _mutation: &PendingMutation,
    ) -> Result<(), StorageError> {
        self.err()
    }

    fn append_mutation(&self, _mutation: &PendingMutation) -> Result<(), StorageError> {
        self.err()
    }

    fn pending_mutations(&self) -> Result<Vec<PendingMutation>, StorageError> {
        self.err()
    }

    fn remove_mutation(&self, _op_id: OpId) -> Result<bool, StorageError> {
        self.err()
    }

    fn pending_count(&self) -> Result<usize, StorageError> {
        self.err()
    }

    fn reconcile_create(
        &self,
        _collection: Collection,
        _temp_id: &RecordId,
        _record: &EntityRecord,
        _op_id: OpId,
    ) -> Result<(), StorageError> {
        self.err()
    }

    fn resolve_id(&self, _temp_id: &RecordId) -> Result<Option<RecordId>, StorageError> {
        self.err()
    }

    fn last_synced(&self, _collection: Collection) -> Result<Option<u64>, StorageError> {
        self.err()
    }

    fn set_last_synced(&self, _collection: Collection, _at_ms: u64) -> Result<(), StorageError> {
        self.err()
    }
}

/// Result of opening the local store. `error` is set when the store failed
/// to open and `store` is an [`UnavailableStore`].
pub struct StoreHandle {
    pub store: Arc<dyn LocalStore>,
    pub error: Option<StorageError>,
}

impl StoreHandle {
    pub fn is_available(&self) -> bool {
        self.error.is_none()
    }
}

/// Open the store at `path` (`None` for an in-memory store).
///
/// Never fails: an open error is logged and reported in the handle while the
/// caller keeps running against an [`UnavailableStore`].
pub fn open_store(path: Option<&str>) -> StoreHandle {
    let opened = match path {
        Some(p) => SqliteStore::open(p),
        None => SqliteStore::open_in_memory(),
    };
    match opened {
        Ok(store) => {
            info!(path = path.unwrap_or(":memory:"), "local store opened");
            StoreHandle {
                store: Arc::new(store),
                error: None,
            }
        }
        Err(e) => {
            error!(path = path.unwrap_or(":memory:"), error = %e, "local store unavailable, continuing without cache");
            StoreHandle {
                store: Arc::new(UnavailableStore::new(e.to_string())),
                error: Some(e),
            }
        }
    }
}
