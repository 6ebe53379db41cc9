//! Change notifications for readers of the local store.
//!
//! Writers and the sync coordinator publish a [`ChangeEvent`] after touching
//! a collection; read-side queries listen and re-read that collection from
//! the store instead of patching the records they hold.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tripledger_core::{Collection, RecordId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A record was written locally (optimistically or from the server).
    Put { collection: Collection, id: RecordId },
    /// A record was removed locally.
    Delete { collection: Collection, id: RecordId },
    /// A temporary id was replaced by the server-issued id.
    Reconciled {
        collection: Collection,
        temp_id: RecordId,
        server_id: RecordId,
    },
    /// The collection was refreshed from the server.
    Refreshed { collection: Collection },
}

impl ChangeEvent {
    pub fn collection(&self) -> Collection {
        match self {
            Self::Put { collection, .. }
            | Self::Delete { collection, .. }
            | Self::Reconciled { collection, .. }
            | Self::Refreshed { collection } => *collection,
        }
    }
}

/// Handle returned by [`ChangeFeed::subscribe`], used to unsubscribe.
pub type SubscriptionId = u64;

type Callback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    /// `None` receives every collection.
    collection: Option<Collection>,
    callback: Callback,
}

impl Subscription {
    fn wants(&self, event: &ChangeEvent) -> bool {
        self.collection.is_none_or(|c| c == event.collection())
    }
}

/// Fan-out of [`ChangeEvent`]s to in-process readers, filtered by
/// collection before any callback runs.
///
/// Callbacks run synchronously on the publishing thread, against a copy of
/// the subscription list taken under the lock. A callback may therefore
/// subscribe or unsubscribe (itself included) without deadlocking; such
/// changes apply from the next publish.
pub struct ChangeFeed {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Receive every event.
    pub fn subscribe_all(
        &self,
        callback: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add(None, Arc::new(callback))
    }

    /// Receive only events for `collection`.
    pub fn subscribe(
        &self,
        collection: Collection,
        callback: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add(Some(collection), Arc::new(callback))
    }

    fn add(&self, collection: Option<Collection>, callback: Callback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.lock().push(Subscription {
            id,
            collection,
            callback,
        });
        id
    }

    /// Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.lock().retain(|s| s.id != id);
    }

    pub fn publish(&self, event: &ChangeEvent) {
        let targets: Vec<Callback> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|s| s.wants(event))
            .map(|s| s.callback.clone())
            .collect();
        for callback in targets {
            callback(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Subscribers that would receive an event for `collection`.
    pub fn watching(&self, collection: Collection) -> usize {
        self.subscriptions
            .lock()
            .iter()
            .filter(|s| s.collection.is_none_or(|c| c == collection))
            .count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
