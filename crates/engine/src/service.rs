//! Owns and wires the sync engine's parts for one client session.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tripledger_core::clock::MonotonicClock;
use tripledger_core::{Collection, EntityRecord};
use tripledger_storage::{LocalStore, StoreHandle, open_store};

use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityDetector, ConnectivitySource, ConnectivityStatus};
use crate::coordinator::{SyncCoordinator, SyncReport};
use crate::error::EngineError;
use crate::events::{ChangeEvent, ChangeFeed};
use crate::queue::MutationQueue;
use crate::reactive::{CollectionQuery, SyncBadge};
use crate::remote::RemoteApi;
use crate::writer::OfflineWriter;

pub struct SyncService {
    config: SyncConfig,
    store: Arc<dyn LocalStore>,
    store_error: Mutex<Option<String>>,
    detector: Arc<ConnectivityDetector>,
    events: Arc<ChangeFeed>,
    clock: Arc<Mutex<MonotonicClock>>,
    writer: Arc<OfflineWriter>,
    coordinator: Arc<SyncCoordinator>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SyncService {
    /// Open the configured store (failing open) and wire everything to
    /// `remote`. Nothing runs until [`SyncService::init`].
    pub fn new(config: SyncConfig, remote: Arc<dyn RemoteApi>) -> Result<Self, EngineError> {
        config.validate()?;
        let handle = open_store(config.database_path.as_deref());
        let detector = Arc::new(ConnectivityDetector::new(config.start_online));
        Ok(Self::with_parts(config, handle, remote, detector))
    }

    pub fn with_parts(
        config: SyncConfig,
        handle: StoreHandle,
        remote: Arc<dyn RemoteApi>,
        detector: Arc<ConnectivityDetector>,
    ) -> Self {
        let StoreHandle { store, error } = handle;
        let events = Arc::new(ChangeFeed::new());
        let clock = Arc::new(Mutex::new(MonotonicClock::new()));
        let connectivity: Arc<dyn ConnectivitySource> = detector.clone();

        let writer = Arc::new(OfflineWriter::new(
            store.clone(),
            remote.clone(),
            connectivity.clone(),
            events.clone(),
            clock.clone(),
        ));
        let coordinator = Arc::new(SyncCoordinator::new(
            store.clone(),
            remote,
            connectivity,
            events.clone(),
        ));

        Self {
            config,
            store,
            store_error: Mutex::new(error.map(|e| e.to_string())),
            detector,
            events,
            clock,
            writer,
            coordinator,
            listener: Mutex::new(None),
        }
    }

    /// Prepare the store and start following connectivity. Safe to call
    /// more than once; only the first call starts the listener.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn init(&self) {
        if let Err(e) = self.store.init_db() {
            warn!(error = %e, "local store failed to initialise, continuing without cache");
            *self.store_error.lock() = Some(e.to_string());
        }
        self.restore_clock();

        {
            let mut listener = self.listener.lock();
            if listener.is_none() {
                *listener = Some(self.spawn_listener());
            }
        }

        let queued = self.queue().len().unwrap_or(0);
        if self.detector.is_online() && queued > 0 {
            info!(queued, "flushing mutations left from a previous session");
            self.coordinator.sync_pending_changes().await;
        }
    }

    /// Keep new temp ids ahead of any restored from the queue.
    fn restore_clock(&self) {
        if let Ok(pending) = self.store.pending_mutations() {
            let newest = pending.iter().map(|m| m.created_at).max().unwrap_or(0);
            self.clock.lock().observe(newest);
        }
    }

    fn spawn_listener(&self) -> JoinHandle<()> {
        let mut rx = self.detector.subscribe();
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            // The detector only notifies on a change, so seeing `true` here
            // means we were offline at some point since the last wake-up.
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if online {
                    let report = coordinator.sync_pending_changes().await;
                    info!(
                        synced = report.synced,
                        failed = report.failed,
                        skipped = report.skipped,
                        "back online, synced"
                    );
                }
            }
        })
    }

    /// Stop following connectivity. `init` may start it again.
    pub fn dispose(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listener.lock().is_some()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Why the local store is unusable, if it is.
    pub fn store_error(&self) -> Option<String> {
        self.store_error.lock().clone()
    }

    pub fn store(&self) -> Arc<dyn LocalStore> {
        self.store.clone()
    }

    pub fn queue(&self) -> MutationQueue {
        MutationQueue::new(self.store.clone())
    }

    pub fn writer(&self) -> Arc<OfflineWriter> {
        self.writer.clone()
    }

    pub fn coordinator(&self) -> Arc<SyncCoordinator> {
        self.coordinator.clone()
    }

    pub fn detector(&self) -> Arc<ConnectivityDetector> {
        self.detector.clone()
    }

    pub fn events(&self) -> Arc<ChangeFeed> {
        self.events.clone()
    }

    pub async fn sync_pending_changes(&self) -> SyncReport {
        self.coordinator.sync_pending_changes().await
    }

    pub fn query(&self, collection: Collection, snapshot: Vec<EntityRecord>) -> CollectionQuery {
        CollectionQuery::new(
            collection,
            snapshot,
            self.store.clone(),
            self.coordinator.clone(),
            self.detector.clone(),
            self.events.clone(),
            self.config.freshness_threshold_ms,
        )
    }

    pub fn connectivity_status(&self) -> ConnectivityStatus {
        let pending_count = match self.queue().len() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "could not count pending mutations");
                0
            }
        };
        ConnectivityStatus {
            online: self.detector.is_online(),
            pending_count,
        }
    }

    pub fn badge(&self) -> SyncBadge {
        let status = self.connectivity_status();
        SyncBadge::from_status(
            status.online,
            status.pending_count,
            self.coordinator.is_syncing(),
        )
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.dispose();
    }
}
