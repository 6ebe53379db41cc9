//! Per-collection read model for the UI.
//!
//! A [`CollectionQuery`] holds the server-rendered snapshot it was created
//! with and a cached view of the local store. Change events for its
//! collection only mark the cache dirty; the next [`CollectionQuery::state`]
//! call re-reads the store and merges again. Records are never patched in
//! place, so a reconciled temp id simply disappears on the next read.
//!
//! The snapshot is never edited either. Ids deleted after it was taken
//! (locally, by a replayed delete, or by a refresh prune) are remembered
//! from `Delete` events and filtered out of it.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::warn;
use tripledger_core::clock::physical_now;
use tripledger_core::{Collection, EntityRecord, RecordId, SyncStatus, merge_records};
use tripledger_storage::LocalStore;

use crate::connectivity::ConnectivitySource;
use crate::coordinator::{SyncCoordinator, SyncReport};
use crate::events::{ChangeEvent, ChangeFeed, SubscriptionId};
use crate::queue::MutationQueue;

/// Everything a list view renders for one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionState {
    pub data: Vec<EntityRecord>,
    /// The local store has not been read yet.
    pub is_loading: bool,
    pub is_stale: bool,
    pub is_syncing: bool,
    pub last_synced: Option<u64>,
    pub is_offline: bool,
    /// Set when the local store could not be read; `data` then falls back
    /// to the snapshot.
    pub load_error: Option<String>,
}

#[derive(Default)]
struct LocalView {
    records: Vec<EntityRecord>,
    hidden: HashSet<RecordId>,
    last_synced: Option<u64>,
    loaded: bool,
    error: Option<String>,
}

pub struct CollectionQuery {
    collection: Collection,
    snapshot: Mutex<Vec<EntityRecord>>,
    view: Mutex<LocalView>,
    dirty: Arc<AtomicBool>,
    store: Arc<dyn LocalStore>,
    queue: MutationQueue,
    coordinator: Arc<SyncCoordinator>,
    connectivity: Arc<dyn ConnectivitySource>,
    events: Arc<ChangeFeed>,
    removed: Arc<Mutex<HashSet<RecordId>>>,
    subscription: SubscriptionId,
    freshness_threshold_ms: u64,
}

impl CollectionQuery {
    pub fn new(
        collection: Collection,
        snapshot: Vec<EntityRecord>,
        store: Arc<dyn LocalStore>,
        coordinator: Arc<SyncCoordinator>,
        connectivity: Arc<dyn ConnectivitySource>,
        events: Arc<ChangeFeed>,
        freshness_threshold_ms: u64,
    ) -> Self {
        let dirty = Arc::new(AtomicBool::new(true));
        let removed = Arc::new(Mutex::new(HashSet::new()));
        let flag = dirty.clone();
        let gone = removed.clone();
        let subscription = events.subscribe(collection, move |event: &ChangeEvent| {
            match event {
                ChangeEvent::Delete { id, .. } => {
                    gone.lock().insert(id.clone());
                }
                ChangeEvent::Put { id, .. } => {
                    gone.lock().remove(id);
                }
                ChangeEvent::Reconciled { server_id, .. } => {
                    gone.lock().remove(server_id);
                }
                ChangeEvent::Refreshed { .. } => {}
            }
            flag.store(true, Ordering::Release);
        });

        Self {
            collection,
            snapshot: Mutex::new(snapshot),
            view: Mutex::new(LocalView::default()),
            dirty,
            queue: MutationQueue::new(store.clone()),
            store,
            coordinator,
            connectivity,
            events,
            removed,
            subscription,
            freshness_threshold_ms,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Replace the server snapshot, e.g. after the page is rendered again.
    pub fn set_snapshot(&self, records: Vec<EntityRecord>) {
        *self.snapshot.lock() = records;
    }

    /// Current state, re-reading the local store first if anything in this
    /// collection changed since the last read.
    pub fn state(&self) -> CollectionState {
        if self.dirty.swap(false, Ordering::AcqRel) {
            self.reload();
        }
        self.current()
    }

    /// State from what is already cached. Never touches the store.
    pub fn current(&self) -> CollectionState {
        let snapshot: Vec<EntityRecord> = {
            let removed = self.removed.lock();
            self.snapshot
                .lock()
                .iter()
                .filter(|r| !removed.contains(&r.id))
                .cloned()
                .collect()
        };
        let view = self.view.lock();

        let mut data = merge_records(&snapshot, &view.records);
        data.retain(|r| !view.hidden.contains(&r.id));

        let is_offline = !self.connectivity.is_online();
        CollectionState {
            data,
            is_loading: !view.loaded,
            is_stale: is_offline || self.past_threshold(view.last_synced),
            is_syncing: self.coordinator.is_syncing(),
            last_synced: view.last_synced,
            is_offline,
            load_error: view.error.clone(),
        }
    }

    /// Run a sync pass and reload on the next read.
    pub async fn refetch(&self) -> SyncReport {
        let report = self.coordinator.sync_pending_changes().await;
        self.dirty.store(true, Ordering::Release);
        report
    }

    /// Per-record badge. Unreadable queues report `Synced`.
    pub fn status_of(&self, id: &RecordId) -> SyncStatus {
        self.queue
            .status_of(self.collection, id)
            .unwrap_or(SyncStatus::Synced)
    }

    fn past_threshold(&self, last_synced: Option<u64>) -> bool {
        let Some(at) = last_synced else {
            return true;
        };
        let now = physical_now().unwrap_or(at);
        now.saturating_sub(at) > self.freshness_threshold_ms
    }

    fn reload(&self) {
        let loaded = self.store.get_all(self.collection).and_then(|records| {
            let hidden = self.queue.pending_deletes(self.collection)?;
            let last_synced = self.store.last_synced(self.collection)?;
            Ok((records, hidden, last_synced))
        });

        let mut view = self.view.lock();
        view.loaded = true;
        match loaded {
            Ok((records, hidden, last_synced)) => {
                view.records = records;
                view.hidden = hidden;
                view.last_synced = last_synced;
                view.error = None;
            }
            Err(e) => {
                warn!(
                    collection = self.collection.as_str(),
                    error = %e,
                    "local store unreadable, showing snapshot only"
                );
                view.records.clear();
                view.hidden.clear();
                view.error = Some(e.to_string());
            }
        }
    }
}

impl Drop for CollectionQuery {
    fn drop(&mut self) {
        self.events.unsubscribe(self.subscription);
    }
}

/// Global sync status shown next to the connectivity indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncBadge {
    Synced,
    Syncing,
    Pending(usize),
    Offline(usize),
}

impl SyncBadge {
    pub fn from_status(online: bool, pending_count: usize, is_syncing: bool) -> Self {
        if !online {
            Self::Offline(pending_count)
        } else if is_syncing {
            Self::Syncing
        } else if pending_count > 0 {
            Self::Pending(pending_count)
        } else {
            Self::Synced
        }
    }
}

impl fmt::Display for SyncBadge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synced => f.write_str("Synced"),
            Self::Syncing => f.write_str("Syncing..."),
            Self::Pending(n) => write!(f, "{n} pending"),
            Self::Offline(0) => f.write_str("Offline"),
            Self::Offline(n) => write!(f, "Offline - {n} pending"),
        }
    }
}
