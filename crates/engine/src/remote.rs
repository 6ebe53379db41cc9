//! The server-side REST API, seen from the client.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tripledger_core::{EntityKind, EntityRecord, RecordId};

/// Why a remote call did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The request never reached the server (offline, DNS, refused, timeout).
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// The server answered with a non-success status.
    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The server answered but the body could not be understood.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Connectivity failures feed the offline path and are never shown to
    /// the user as errors.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Rejected { status: 404, .. })
    }
}

/// Conventional CRUD endpoints per entity kind:
/// `POST /{kind}`, `PATCH /{kind}/{id}`, `DELETE /{kind}/{id}`, `GET /{kind}`.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Create an entity; the server assigns its id.
    async fn create(&self, kind: EntityKind, payload: &Value) -> Result<EntityRecord, RemoteError>;

    async fn update(
        &self,
        kind: EntityKind,
        id: &RecordId,
        payload: &Value,
    ) -> Result<EntityRecord, RemoteError>;

    async fn delete(&self, kind: EntityKind, id: &RecordId) -> Result<(), RemoteError>;

    /// Canonical list of every entity of this kind.
    async fn list(&self, kind: EntityKind) -> Result<Vec<EntityRecord>, RemoteError>;
}
