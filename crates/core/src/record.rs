use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::ids::RecordId;

/// Named collections in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Collection {
    Transactions,
    Accounts,
    Trips,
    PendingChanges,
}

impl Collection {
    /// Collections that hold entity records (everything but the queue).
    pub const DATA: [Collection; 3] = [Self::Transactions, Self::Accounts, Self::Trips];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transactions => "TRANSACTIONS",
            Self::Accounts => "ACCOUNTS",
            Self::Trips => "TRIPS",
            Self::PendingChanges => "PENDING_CHANGES",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "TRANSACTIONS" => Ok(Self::Transactions),
            "ACCOUNTS" => Ok(Self::Accounts),
            "TRIPS" => Ok(Self::Trips),
            "PENDING_CHANGES" => Ok(Self::PendingChanges),
            _ => Err(CoreError::UnknownCollection(s.to_string())),
        }
    }

    /// The entity kind stored in this collection, if it is a data collection.
    pub fn entity_kind(&self) -> Option<EntityKind> {
        match self {
            Self::Transactions => Some(EntityKind::Transaction),
            Self::Accounts => Some(EntityKind::Account),
            Self::Trips => Some(EntityKind::Trip),
            Self::PendingChanges => None,
        }
    }
}

/// Kinds of entity the remote API knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Transaction,
    Account,
    Trip,
}

impl EntityKind {
    pub fn collection(&self) -> Collection {
        match self {
            Self::Transaction => Collection::Transactions,
            Self::Account => Collection::Accounts,
            Self::Trip => Collection::Trips,
        }
    }

    /// REST path segment, e.g. `transactions` in `POST /transactions`.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Transaction => "transactions",
            Self::Account => "accounts",
            Self::Trip => "trips",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Account => "account",
            Self::Trip => "trip",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "transaction" => Ok(Self::Transaction),
            "account" => Ok(Self::Account),
            "trip" => Ok(Self::Trip),
            _ => Err(CoreError::InvalidData(format!("unknown entity kind: {s}"))),
        }
    }
}

/// Where a record stands relative to the server. Derived from the queue,
/// never persisted on the record itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Synced,
    PendingCreate,
    PendingUpdate,
    PendingDelete,
}

/// A transaction, account or trip: opaque application payload plus the
/// control fields used for identity and recency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: RecordId,
    pub created_at: u64,
    pub updated_at: Option<u64>,
    pub payload: Value,
}

impl EntityRecord {
    pub fn new(id: RecordId, created_at: u64, payload: Value) -> Self {
        Self {
            id,
            created_at,
            updated_at: Some(created_at),
            payload,
        }
    }

    /// Timestamp used for last-write-wins: `updated_at`, else `created_at`.
    pub fn recency(&self) -> u64 {
        self.updated_at.unwrap_or(self.created_at)
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = id;
        self
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec_named(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}
