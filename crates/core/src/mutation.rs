use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::ids::{OpId, RecordId};
use crate::record::{EntityKind, SyncStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationOp {
    Create,
    Update,
    Delete,
}

impl MutationOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(CoreError::InvalidData(format!("unknown mutation op: {s}"))),
        }
    }

    pub fn sync_status(&self) -> SyncStatus {
        match self {
            Self::Create => SyncStatus::PendingCreate,
            Self::Update => SyncStatus::PendingUpdate,
            Self::Delete => SyncStatus::PendingDelete,
        }
    }
}

/// A write that has not been acknowledged by the server yet.
///
/// Immutable once queued. Retrying a mutation never touches `created_at`,
/// and the queue position is fixed at append time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub op_id: OpId,
    pub entity_kind: EntityKind,
    pub operation: MutationOp,
    /// Record the mutation applies to. For creates this is the temporary id.
    pub target: RecordId,
    /// Entity payload for create/update, `None` for delete.
    pub payload: Option<Value>,
    pub created_at: u64,
}

impl PendingMutation {
    pub fn create(kind: EntityKind, temp_id: RecordId, payload: Value, created_at: u64) -> Self {
        Self {
            op_id: OpId::new(),
            entity_kind: kind,
            operation: MutationOp::Create,
            target: temp_id,
            payload: Some(payload),
            created_at,
        }
    }

    pub fn update(kind: EntityKind, target: RecordId, payload: Value, created_at: u64) -> Self {
        Self {
            op_id: OpId::new(),
            entity_kind: kind,
            operation: MutationOp::Update,
            target,
            payload: Some(payload),
            created_at,
        }
    }

    pub fn delete(kind: EntityKind, target: RecordId, created_at: u64) -> Self {
        Self {
            op_id: OpId::new(),
            entity_kind: kind,
            operation: MutationOp::Delete,
            target,
            payload: None,
            created_at,
        }
    }

    pub fn payload_to_msgpack(&self) -> Result<Option<Vec<u8>>, CoreError> {
        self.payload
            .as_ref()
            .map(|p| rmp_serde::to_vec_named(p).map_err(|e| CoreError::Serialization(e.to_string())))
            .transpose()
    }

    pub fn payload_from_msgpack(bytes: &[u8]) -> Result<Value, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}
