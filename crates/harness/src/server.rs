use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tripledger_core::clock::MonotonicClock;
use tripledger_core::{EntityKind, EntityRecord, RecordId};
use tripledger_engine::writer::apply_patch;
use tripledger_engine::{RemoteApi, RemoteError};

/// A request the mock server received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(EntityKind),
    Update(EntityKind, RecordId),
    Delete(EntityKind, RecordId),
    List(EntityKind),
}

#[derive(Default)]
struct ServerState {
    tables: HashMap<EntityKind, BTreeMap<RecordId, EntityRecord>>,
    next_id: u64,
    calls: Vec<Call>,
    rejected_ids: HashSet<RecordId>,
    rejected_payloads: Vec<(String, Value)>,
    clock: MonotonicClock,
}

impl ServerState {
    fn payload_rejected(&self, payload: &Value) -> bool {
        self.rejected_payloads
            .iter()
            .any(|(key, value)| payload.get(key) == Some(value))
    }

    fn now(&mut self) -> Result<u64, RemoteError> {
        self.clock
            .tick()
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

fn prefix(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Transaction => "tx",
        EntityKind::Account => "acc",
        EntityKind::Trip => "trip",
    }
}

fn rejected(status: u16, message: &str) -> RemoteError {
    RemoteError::Rejected {
        status,
        message: message.to_string(),
    }
}

/// In-memory stand-in for the REST API.
///
/// Every call yields to the runtime once before doing anything, so calls
/// issued from `tokio::join!` genuinely interleave.
pub struct MockServer {
    state: Mutex<ServerState>,
    reachable: AtomicBool,
    after_list: Mutex<Option<ListHook>>,
}

type ListHook = Arc<dyn Fn(EntityKind) + Send + Sync>;

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServerState::default()),
            reachable: AtomicBool::new(true),
            after_list: Mutex::new(None),
        }
    }

    /// While unreachable, every call fails as a connectivity error.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Answer updates and deletes of `id` with a 500.
    pub fn reject_id(&self, id: &RecordId) {
        self.state.lock().rejected_ids.insert(id.clone());
    }

    /// Answer creates and updates whose payload has `key == value` with a 422.
    pub fn reject_payloads_with(&self, key: &str, value: Value) {
        self.state
            .lock()
            .rejected_payloads
            .push((key.to_string(), value));
    }

    /// Run `hook` after every list response is built and before it reaches
    /// the caller, to simulate writes landing while a list is in flight.
    pub fn after_list(&self, hook: impl Fn(EntityKind) + Send + Sync + 'static) {
        *self.after_list.lock() = Some(Arc::new(hook));
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.rejected_ids.clear();
        state.rejected_payloads.clear();
    }

    /// Add a record directly, as if another client had created it.
    pub fn seed(&self, kind: EntityKind, payload: Value) -> Result<EntityRecord, RemoteError> {
        let mut state = self.state.lock();
        Self::insert(&mut state, kind, payload)
    }

    pub fn records(&self, kind: EntityKind) -> Vec<EntityRecord> {
        self.state
            .lock()
            .tables
            .get(&kind)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn count_calls(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| matches(c)).count()
    }

    pub fn create_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, Call::Create(_)))
    }

    pub fn reset_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn insert(
        state: &mut ServerState,
        kind: EntityKind,
        payload: Value,
    ) -> Result<EntityRecord, RemoteError> {
        state.next_id += 1;
        let id = RecordId::new(format!("{}_{}", prefix(kind), state.next_id));
        let now = state.now()?;
        let record = EntityRecord::new(id.clone(), now, payload);
        state
            .tables
            .entry(kind)
            .or_default()
            .insert(id, record.clone());
        Ok(record)
    }

    async fn enter(&self, call: Call) -> Result<parking_lot::MutexGuard<'_, ServerState>, RemoteError> {
        tokio::task::yield_now().await;
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("connection refused".into()));
        }
        let mut state = self.state.lock();
        state.calls.push(call);
        Ok(state)
    }
}

#[async_trait]
impl RemoteApi for MockServer {
    async fn create(&self, kind: EntityKind, payload: &Value) -> Result<EntityRecord, RemoteError> {
        let mut state = self.enter(Call::Create(kind)).await?;
        if state.payload_rejected(payload) {
            return Err(rejected(422, "validation failed"));
        }
        Self::insert(&mut state, kind, payload.clone())
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &RecordId,
        payload: &Value,
    ) -> Result<EntityRecord, RemoteError> {
        let mut state = self.enter(Call::Update(kind, id.clone())).await?;
        if state.rejected_ids.contains(id) {
            return Err(rejected(500, "internal error"));
        }
        if state.payload_rejected(payload) {
            return Err(rejected(422, "validation failed"));
        }
        let now = state.now()?;
        let record = state
            .tables
            .get_mut(&kind)
            .and_then(|t| t.get_mut(id))
            .ok_or_else(|| rejected(404, "not found"))?;
        record.payload = apply_patch(&record.payload, payload);
        record.updated_at = Some(now);
        Ok(record.clone())
    }

    async fn delete(&self, kind: EntityKind, id: &RecordId) -> Result<(), RemoteError> {
        let mut state = self.enter(Call::Delete(kind, id.clone())).await?;
        if state.rejected_ids.contains(id) {
            return Err(rejected(500, "internal error"));
        }
        state
            .tables
            .get_mut(&kind)
            .and_then(|t| t.remove(id))
            .map(|_| ())
            .ok_or_else(|| rejected(404, "not found"))
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<EntityRecord>, RemoteError> {
        let listed: Vec<EntityRecord> = {
            let state = self.enter(Call::List(kind)).await?;
            state
                .tables
                .get(&kind)
                .map(|t| t.values().cloned().collect())
                .unwrap_or_default()
        };
        let hook = self.after_list.lock().clone();
        if let Some(hook) = hook {
            hook(kind);
        }
        Ok(listed)
    }
}
