//! Replays the mutation queue against the server and pulls canonical data.
//!
//! One pass at a time: a second caller while a pass is running gets a
//! skipped report back immediately. Within a pass every mutation is tried
//! independently in FIFO order; a failure leaves that mutation queued and
//! blocks later mutations for the same record, nothing more.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use tripledger_core::clock::physical_now;
use tripledger_core::merge::latest;
use tripledger_core::{
    Collection, CoreError, EntityRecord, MutationOp, OpId, PendingMutation, RecordId,
};
use tripledger_storage::LocalStore;

use crate::connectivity::ConnectivitySource;
use crate::error::EngineError;
use crate::events::{ChangeEvent, ChangeFeed};
use crate::queue::MutationQueue;
use crate::remote::RemoteApi;

/// Outcome of one [`SyncCoordinator::sync_pending_changes`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
    /// Another pass was already running; this call did nothing.
    pub skipped: bool,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Clears the in-flight flag when a pass ends, including on early return.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncCoordinator {
    store: Arc<dyn LocalStore>,
    queue: MutationQueue,
    remote: Arc<dyn RemoteApi>,
    connectivity: Arc<dyn ConnectivitySource>,
    events: Arc<ChangeFeed>,
    in_flight: AtomicBool,
    failure_counts: Mutex<HashMap<OpId, u32>>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteApi>,
        connectivity: Arc<dyn ConnectivitySource>,
        events: Arc<ChangeFeed>,
    ) -> Self {
        Self {
            queue: MutationQueue::new(store.clone()),
            store,
            remote,
            connectivity,
            events,
            in_flight: AtomicBool::new(false),
            failure_counts: Mutex::new(HashMap::new()),
        }
    }

    /// True while a pass is running.
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    /// How many passes in a row a still-queued mutation has failed.
    pub fn failure_count(&self, op_id: OpId) -> u32 {
        self.failure_counts.lock().get(&op_id).copied().unwrap_or(0)
    }

    /// Flush the queue, then refresh every collection from the server.
    pub async fn sync_pending_changes(&self) -> SyncReport {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("sync already in progress, skipping");
            return SyncReport::skipped();
        }
        let _guard = FlightGuard(&self.in_flight);

        if !self.connectivity.is_online() {
            debug!("offline, nothing to sync");
            return SyncReport::default();
        }

        let report = self.flush_queue().await;
        if report.synced > 0 || report.failed > 0 {
            info!(synced = report.synced, failed = report.failed, "sync pass finished");
        }

        if self.connectivity.is_online() {
            self.refresh_all().await;
        }
        report
    }

    async fn flush_queue(&self) -> SyncReport {
        let pending = match self.queue.pending() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "could not read mutation queue");
                return SyncReport::default();
            }
        };

        let mut report = SyncReport::default();
        // Keyed on the server id where one is known, so a temp id and the id
        // it was reconciled to block each other.
        let mut blocked: HashSet<RecordId> = HashSet::new();

        for mutation in pending {
            let entity = self
                .server_target(&mutation)
                .unwrap_or_else(|_| mutation.target.clone());
            if blocked.contains(&entity) {
                debug!(op = %mutation.op_id, target = %mutation.target, "blocked by earlier failure");
                report.failed += 1;
                continue;
            }

            match self.replay(&mutation).await {
                Ok(()) => {
                    report.synced += 1;
                    self.failure_counts.lock().remove(&mutation.op_id);
                }
                Err(e) => {
                    report.failed += 1;
                    blocked.insert(entity);
                    let attempts = {
                        let mut counts = self.failure_counts.lock();
                        let n = counts.entry(mutation.op_id).or_insert(0);
                        *n += 1;
                        *n
                    };
                    match &e {
                        EngineError::Remote(r) if r.is_connectivity() => {
                            info!(op = %mutation.op_id, attempts, error = %e, "replay deferred")
                        }
                        _ => warn!(op = %mutation.op_id, attempts, error = %e, "replay failed"),
                    }
                }
            }
        }
        report
    }

    /// Map a queued target to the id the server knows it by.
    fn server_target(&self, mutation: &PendingMutation) -> Result<RecordId, EngineError> {
        if !mutation.target.is_temporary() {
            return Ok(mutation.target.clone());
        }
        self.store
            .resolve_id(&mutation.target)?
            .ok_or_else(|| EngineError::UnresolvedTempId(mutation.target.to_string()))
    }

    async fn replay(&self, mutation: &PendingMutation) -> Result<(), EngineError> {
        let kind = mutation.entity_kind;
        let collection = kind.collection();
        debug!(
            op = %mutation.op_id,
            operation = mutation.operation.as_str(),
            kind = kind.as_str(),
            target = %mutation.target,
            "replaying"
        );

        match mutation.operation {
            MutationOp::Create => {
                let payload = mutation.payload.as_ref().ok_or_else(|| {
                    EngineError::MalformedMutation(format!("create {} has no payload", mutation.op_id))
                })?;
                let temp_id = &mutation.target;
                let created = self.remote.create(kind, payload).await?;
                let server_id = created.id.clone();

                let reconciled = match self.store.get(collection, temp_id)? {
                    Some(local) => {
                        let local = local.with_id(server_id.clone());
                        latest(&created, &local).clone()
                    }
                    None => created,
                };
                if let Err(e) =
                    self.store
                        .reconcile_create(collection, temp_id, &reconciled, mutation.op_id)
                {
                    // The server now has the record but the create stays
                    // queued, so the next pass will post it again.
                    error!(
                        temp = %temp_id,
                        server = %server_id,
                        error = %e,
                        "created on server but could not reconcile locally"
                    );
                    return Err(e.into());
                }
                info!(temp = %temp_id, server = %server_id, "reconciled temporary id");
                self.events.publish(&ChangeEvent::Reconciled {
                    collection,
                    temp_id: temp_id.clone(),
                    server_id,
                });
            }
            MutationOp::Update => {
                let payload = mutation.payload.as_ref().ok_or_else(|| {
                    EngineError::MalformedMutation(format!("update {} has no payload", mutation.op_id))
                })?;
                let target = self.server_target(mutation)?;
                let updated = self.remote.update(kind, &target, payload).await?;

                let keep = match self.store.get(collection, &target)? {
                    Some(local) => latest(&updated, &local).clone(),
                    None => updated,
                };
                self.store.put_many(collection, std::slice::from_ref(&keep))?;
                self.queue.acknowledge(mutation.op_id)?;
                self.events.publish(&ChangeEvent::Put {
                    collection,
                    id: target,
                });
            }
            MutationOp::Delete => {
                let target = self.server_target(mutation)?;
                match self.remote.delete(kind, &target).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        debug!(%target, "already deleted on server");
                    }
                    Err(e) => return Err(e.into()),
                }
                self.store.delete(collection, &target)?;
                self.queue.acknowledge(mutation.op_id)?;
                self.events.publish(&ChangeEvent::Delete {
                    collection,
                    id: target,
                });
            }
        }
        Ok(())
    }

    pub async fn refresh_all(&self) {
        for collection in Collection::DATA {
            if let Err(e) = self.refresh_collection(collection).await {
                warn!(collection = collection.as_str(), error = %e, "refresh failed");
            }
        }
    }

    /// Pull the canonical list for one collection and fold it into the
    /// local store. Returns how many server records were written.
    ///
    /// A server record is skipped when it has a queued delete, or when the
    /// local copy is newer and either still has queued work or was written
    /// while the list was in flight. Local records the server no longer
    /// lists are removed unless they are temporary, still have queued work,
    /// or first appeared while the list was in flight.
    pub async fn refresh_collection(&self, collection: Collection) -> Result<usize, EngineError> {
        let kind = collection
            .entity_kind()
            .ok_or_else(|| CoreError::UnknownCollection(collection.as_str().to_string()))?;

        let before = self.local_by_id(collection)?;
        let server = self.remote.list(kind).await?;
        let pending = self.queue.pending_targets(collection)?;
        let deletes = self.queue.pending_deletes(collection)?;
        let local = self.local_by_id(collection)?;

        let server_ids: HashSet<&RecordId> = server.iter().map(|r| &r.id).collect();
        let mut writes = Vec::with_capacity(server.len());
        for record in &server {
            if deletes.contains(&record.id) {
                continue;
            }
            let Some(current) = local.get(&record.id) else {
                writes.push(record.clone());
                continue;
            };
            let touched = before.get(&record.id).map(EntityRecord::recency) != Some(current.recency());
            if current.recency() > record.recency() && (touched || pending.contains(&record.id)) {
                continue;
            }
            writes.push(record.clone());
        }

        let mut pruned = Vec::new();
        for id in before.keys() {
            if server_ids.contains(id) || id.is_temporary() || pending.contains(id) {
                continue;
            }
            if self.store.delete(collection, id)? {
                pruned.push(id.clone());
            }
        }

        self.store.put_many(collection, &writes)?;
        self.store.set_last_synced(collection, physical_now()?)?;
        debug!(
            collection = collection.as_str(),
            written = writes.len(),
            pruned = pruned.len(),
            "refreshed"
        );
        for id in pruned {
            self.events.publish(&ChangeEvent::Delete { collection, id });
        }
        self.events.publish(&ChangeEvent::Refreshed { collection });
        Ok(writes.len())
    }

    fn local_by_id(&self, collection: Collection) -> Result<HashMap<RecordId, EntityRecord>, EngineError> {
        Ok(self
            .store
            .get_all(collection)?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect())
    }
}
