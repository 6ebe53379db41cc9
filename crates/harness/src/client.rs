use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tripledger_core::{Collection, EntityKind, EntityRecord, RecordId};
use tripledger_engine::{
    CollectionQuery, ConnectivityDetector, EngineError, SyncConfig, SyncReport, SyncService,
    WriteOutcome,
};
use tripledger_storage::{LocalStore, StoreHandle};

use crate::MockServer;

/// One app session talking to a shared [`MockServer`].
pub struct TestClient {
    pub server: Arc<MockServer>,
    pub service: SyncService,
}

impl TestClient {
    /// Online client with an in-memory store.
    pub async fn new(server: Arc<MockServer>) -> Result<Self, EngineError> {
        Self::with_config(SyncConfig::default(), server).await
    }

    /// Client whose store lives at `path`, for restart scenarios.
    pub async fn on_disk(path: &str, server: Arc<MockServer>) -> Result<Self, EngineError> {
        let config = SyncConfig {
            database_path: Some(path.to_string()),
            ..SyncConfig::default()
        };
        Self::with_config(config, server).await
    }

    /// Online client over a caller-supplied store.
    pub async fn with_store(
        store: Arc<dyn LocalStore>,
        server: Arc<MockServer>,
    ) -> Result<Self, EngineError> {
        let config = SyncConfig::default();
        let detector = Arc::new(ConnectivityDetector::new(config.start_online));
        let handle = StoreHandle { store, error: None };
        let service = SyncService::with_parts(config, handle, server.clone(), detector);
        service.init().await;
        Ok(Self { server, service })
    }

    pub async fn with_config(config: SyncConfig, server: Arc<MockServer>) -> Result<Self, EngineError> {
        let service = SyncService::new(config, server.clone())?;
        service.init().await;
        Ok(Self { server, service })
    }

    /// Lose the network: the detector flips and the server stops answering.
    pub fn go_offline(&self) {
        self.server.set_reachable(false);
        self.service.detector().set_online(false);
    }

    /// Regain the network. This fires the service's online transition.
    pub fn go_online(&self) {
        self.server.set_reachable(true);
        self.service.detector().set_online(true);
    }

    pub async fn add_expense(&self, amount: i64, note: &str) -> WriteOutcome {
        self.service
            .writer()
            .create(
                EntityKind::Transaction,
                json!({ "amount": amount, "currency": "EUR", "note": note }),
            )
            .await
    }

    pub async fn edit(&self, kind: EntityKind, id: &RecordId, patch: Value) -> WriteOutcome {
        self.service.writer().update(kind, id, patch).await
    }

    pub async fn remove(&self, kind: EntityKind, id: &RecordId) -> WriteOutcome {
        self.service.writer().delete(kind, id).await
    }

    pub async fn sync(&self) -> SyncReport {
        self.service.sync_pending_changes().await
    }

    pub fn pending(&self) -> usize {
        self.service.connectivity_status().pending_count
    }

    pub fn transactions(&self) -> CollectionQuery {
        self.service.query(Collection::Transactions, Vec::new())
    }

    /// Merged transactions as the UI would render them right now.
    pub fn visible_transactions(&self) -> Vec<EntityRecord> {
        self.transactions().state().data
    }
}

/// Poll `done` until it holds or two seconds pass, giving spawned tasks
/// (the connectivity listener) room to run.
pub async fn wait_for(done: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}
