//! Write entry points that succeed with or without the network.
//!
//! Each write first tries the server when the detector says we are online.
//! If that is not possible, the write is applied to the local store and a
//! mutation is queued in the same transaction. Callers always get a record
//! they can render; only a local storage failure is reported as a failure.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};
use tripledger_core::clock::MonotonicClock;
use tripledger_core::{EntityKind, EntityRecord, PendingMutation, RecordId};
use tripledger_storage::{LocalStore, LocalWrite};

use crate::connectivity::ConnectivitySource;
use crate::error::EngineError;
use crate::events::{ChangeEvent, ChangeFeed};
use crate::queue::MutationQueue;
use crate::remote::{RemoteApi, RemoteError};

/// What a write produced, as shown to the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub success: bool,
    /// The write is only local for now and sits in the pending queue.
    pub is_offline: bool,
    /// The record as stored (for deletes, the record that was removed, if known).
    pub record: Option<EntityRecord>,
    /// Set when `success` is false.
    pub error: Option<String>,
}

impl WriteOutcome {
    fn online(record: Option<EntityRecord>) -> Self {
        Self {
            success: true,
            is_offline: false,
            record,
            error: None,
        }
    }

    fn offline(record: Option<EntityRecord>) -> Self {
        Self {
            success: true,
            is_offline: true,
            record,
            error: None,
        }
    }

    fn failed(error: &EngineError) -> Self {
        Self {
            success: false,
            is_offline: true,
            record: None,
            error: Some(error.to_string()),
        }
    }
}

/// Shallow JSON merge-patch: top-level keys of `patch` replace those of
/// `base`. Non-object payloads are replaced wholesale.
pub fn apply_patch(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            let mut merged = base.clone();
            for (k, v) in patch {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        (_, patch) => patch.clone(),
    }
}

fn log_remote_failure(op: &str, kind: EntityKind, err: &RemoteError) {
    if err.is_connectivity() {
        info!(op, kind = kind.as_str(), error = %err, "server unreachable, saving offline");
    } else {
        warn!(op, kind = kind.as_str(), error = %err, "server rejected write, saving offline");
    }
}

pub struct OfflineWriter {
    store: Arc<dyn LocalStore>,
    queue: MutationQueue,
    remote: Arc<dyn RemoteApi>,
    connectivity: Arc<dyn ConnectivitySource>,
    events: Arc<ChangeFeed>,
    clock: Arc<Mutex<MonotonicClock>>,
}

impl OfflineWriter {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteApi>,
        connectivity: Arc<dyn ConnectivitySource>,
        events: Arc<ChangeFeed>,
        clock: Arc<Mutex<MonotonicClock>>,
    ) -> Self {
        Self {
            queue: MutationQueue::new(store.clone()),
            store,
            remote,
            connectivity,
            events,
            clock,
        }
    }

    fn tick(&self) -> Result<u64, EngineError> {
        Ok(self.clock.lock().tick()?)
    }

    /// A timestamp strictly newer than `floor`, so a local edit always wins
    /// over the version it was made on.
    fn tick_after(&self, floor: u64) -> Result<u64, EngineError> {
        let mut clock = self.clock.lock();
        clock.observe(floor);
        Ok(clock.tick()?)
    }

    /// Whether `id` may be written to the server directly. Temporary ids and
    /// ids with queued work must go through the queue so they replay in
    /// order. An unreadable queue counts as queued work.
    fn can_write_direct(&self, kind: EntityKind, id: &RecordId) -> bool {
        if !self.connectivity.is_online() || id.is_temporary() {
            return false;
        }
        match self.queue.pending_targets(kind.collection()) {
            Ok(targets) if targets.contains(id) => {
                debug!(%id, kind = kind.as_str(), "queued work for record, writing behind it");
                false
            }
            Ok(_) => true,
            Err(e) => {
                warn!(%id, error = %e, "could not read pending queue, saving offline");
                false
            }
        }
    }

    /// Cache a server-confirmed record. The server already has it, so a
    /// local failure here is logged and otherwise ignored.
    fn cache_confirmed(&self, kind: EntityKind, record: &EntityRecord) {
        let collection = kind.collection();
        match self.store.put_many(collection, std::slice::from_ref(record)) {
            Ok(()) => self.events.publish(&ChangeEvent::Put {
                collection,
                id: record.id.clone(),
            }),
            Err(e) => warn!(id = %record.id, error = %e, "could not cache confirmed record"),
        }
    }

    /// Create an entity. `payload` carries no id; the server (or, offline, a
    /// `temp-<millis>` placeholder) provides one.
    pub async fn create(&self, kind: EntityKind, payload: Value) -> WriteOutcome {
        if self.connectivity.is_online() {
            match self.remote.create(kind, &payload).await {
                Ok(record) => {
                    debug!(id = %record.id, kind = kind.as_str(), "created online");
                    self.cache_confirmed(kind, &record);
                    return WriteOutcome::online(Some(record));
                }
                Err(e) => log_remote_failure("create", kind, &e),
            }
        }

        match self.create_offline(kind, payload) {
            Ok(record) => WriteOutcome::offline(Some(record)),
            Err(e) => {
                warn!(kind = kind.as_str(), error = %e, "offline create failed");
                WriteOutcome::failed(&e)
            }
        }
    }

    fn create_offline(&self, kind: EntityKind, payload: Value) -> Result<EntityRecord, EngineError> {
        let now = self.tick()?;
        let temp_id = RecordId::temporary(now);
        let record = EntityRecord::new(temp_id.clone(), now, payload.clone());
        let mutation = PendingMutation::create(kind, temp_id, payload, now);
        let collection = kind.collection();

        self.store
            .commit_offline(collection, LocalWrite::Put(&record), &mutation)?;
        info!(id = %record.id, kind = kind.as_str(), "saved offline");
        self.events.publish(&ChangeEvent::Put {
            collection,
            id: record.id.clone(),
        });
        Ok(record)
    }

    /// Patch an entity's payload. An entity with queued mutations (including
    /// any temporary id) is never sent to the server directly: the update
    /// waits in the queue behind them.
    pub async fn update(&self, kind: EntityKind, id: &RecordId, patch: Value) -> WriteOutcome {
        if self.can_write_direct(kind, id) {
            match self.remote.update(kind, id, &patch).await {
                Ok(record) => {
                    self.cache_confirmed(kind, &record);
                    return WriteOutcome::online(Some(record));
                }
                Err(e) => log_remote_failure("update", kind, &e),
            }
        }

        match self.update_offline(kind, id, patch) {
            Ok(record) => WriteOutcome::offline(Some(record)),
            Err(e) => {
                warn!(%id, error = %e, "offline update failed");
                WriteOutcome::failed(&e)
            }
        }
    }

    fn update_offline(
        &self,
        kind: EntityKind,
        id: &RecordId,
        patch: Value,
    ) -> Result<EntityRecord, EngineError> {
        let collection = kind.collection();
        let current = self.store.get(collection, id)?;
        let now = self.tick_after(current.as_ref().map_or(0, |r| r.recency()))?;

        let record = match current {
            Some(existing) => EntityRecord {
                id: id.clone(),
                created_at: existing.created_at,
                updated_at: Some(now),
                payload: apply_patch(&existing.payload, &patch),
            },
            None => EntityRecord::new(id.clone(), now, patch.clone()),
        };
        let mutation = PendingMutation::update(kind, id.clone(), patch, now);

        self.store
            .commit_offline(collection, LocalWrite::Put(&record), &mutation)?;
        self.events.publish(&ChangeEvent::Put {
            collection,
            id: id.clone(),
        });
        Ok(record)
    }

    pub async fn delete(&self, kind: EntityKind, id: &RecordId) -> WriteOutcome {
        let collection = kind.collection();
        let existing = match self.store.get(collection, id) {
            Ok(record) => record,
            Err(e) => {
                warn!(%id, error = %e, "could not read record before delete");
                None
            }
        };

        if self.can_write_direct(kind, id) {
            match self.remote.delete(kind, id).await {
                Ok(()) => {
                    self.forget_confirmed(kind, id);
                    return WriteOutcome::online(existing);
                }
                Err(e) if e.is_not_found() => {
                    self.forget_confirmed(kind, id);
                    return WriteOutcome::online(existing);
                }
                Err(e) => log_remote_failure("delete", kind, &e),
            }
        }

        match self.delete_offline(kind, id) {
            Ok(()) => WriteOutcome::offline(existing),
            Err(e) => {
                warn!(%id, error = %e, "offline delete failed");
                WriteOutcome::failed(&e)
            }
        }
    }

    fn forget_confirmed(&self, kind: EntityKind, id: &RecordId) {
        let collection = kind.collection();
        if let Err(e) = self.store.delete(collection, id) {
            warn!(%id, error = %e, "could not drop deleted record from cache");
        }
        // The server has dropped it either way; readers must stop showing it.
        self.events.publish(&ChangeEvent::Delete {
            collection,
            id: id.clone(),
        });
    }

    fn delete_offline(&self, kind: EntityKind, id: &RecordId) -> Result<(), EngineError> {
        let collection = kind.collection();
        let now = self.tick()?;
        let mutation = PendingMutation::delete(kind, id.clone(), now);
        self.store
            .commit_offline(collection, LocalWrite::Remove(id), &mutation)?;
        self.events.publish(&ChangeEvent::Delete {
            collection,
            id: id.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_overlays_top_level_keys() {
        let base = json!({"amount": 10, "currency": "EUR", "note": "taxi"});
        let merged = apply_patch(&base, &json!({"amount": 12, "tip": 1}));
        assert_eq!(
            merged,
            json!({"amount": 12, "currency": "EUR", "note": "taxi", "tip": 1})
        );
    }

    #[test]
    fn non_object_patch_replaces() {
        assert_eq!(apply_patch(&json!({"a": 1}), &json!(5)), json!(5));
        assert_eq!(apply_patch(&json!(null), &json!({"a": 1})), json!({"a": 1}));
    }
}
