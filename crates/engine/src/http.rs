//! [`RemoteApi`] over HTTP with `reqwest`.
//!
//! Entities travel as flat JSON objects: `id`, `createdAt` and `updatedAt`
//! (epoch milliseconds) sit next to the application fields, which become the
//! record payload.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{Map, Value};
use tracing::debug;
use tripledger_core::{EntityKind, EntityRecord, RecordId};

use crate::config::SyncConfig;
use crate::error::EngineError;
use crate::remote::{RemoteApi, RemoteError};

pub struct HttpRemote {
    client: Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(config: &SyncConfig) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| EngineError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.base_url, kind.path())
    }

    fn entity_url(&self, kind: EntityKind, id: &RecordId) -> String {
        format!("{}/{}/{}", self.base_url, kind.path(), id)
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::Decode(e.to_string())
    } else {
        RemoteError::Unreachable(e.to_string())
    }
}

async fn check_status(resp: Response) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(RemoteError::Rejected {
        status: status.as_u16(),
        message,
    })
}

fn as_millis(value: Option<&Value>, field: &str) -> Result<Option<u64>, RemoteError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| RemoteError::Decode(format!("{field} is not epoch millis: {v}"))),
    }
}

/// Split a flat server entity into control fields and payload.
pub fn decode_entity(value: Value) -> Result<EntityRecord, RemoteError> {
    let Value::Object(mut fields) = value else {
        return Err(RemoteError::Decode("entity is not a JSON object".into()));
    };
    let id = match fields.remove("id") {
        Some(Value::String(s)) => RecordId::new(s),
        Some(Value::Number(n)) => RecordId::new(n.to_string()),
        other => {
            return Err(RemoteError::Decode(format!("missing or invalid id: {other:?}")));
        }
    };
    let created_at = as_millis(fields.get("createdAt"), "createdAt")?;
    let updated_at = as_millis(fields.get("updatedAt"), "updatedAt")?;
    fields.remove("createdAt");
    fields.remove("updatedAt");

    Ok(EntityRecord {
        id,
        created_at: created_at.or(updated_at).unwrap_or(0),
        updated_at,
        payload: Value::Object(fields),
    })
}

/// Request body for create/update: the payload's own fields, with any
/// control fields stripped so the server stays authoritative for them.
pub fn encode_payload(payload: &Value) -> Value {
    match payload {
        Value::Object(fields) => {
            let body: Map<String, Value> = fields
                .iter()
                .filter(|(k, _)| !matches!(k.as_str(), "id" | "createdAt" | "updatedAt"))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(body)
        }
        other => other.clone(),
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn create(&self, kind: EntityKind, payload: &Value) -> Result<EntityRecord, RemoteError> {
        let url = self.collection_url(kind);
        debug!(%url, "POST");
        let resp = self
            .client
            .post(&url)
            .json(&encode_payload(payload))
            .send()
            .await
            .map_err(transport_error)?;
        let body: Value = check_status(resp).await?.json().await.map_err(transport_error)?;
        decode_entity(body)
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &RecordId,
        payload: &Value,
    ) -> Result<EntityRecord, RemoteError> {
        let url = self.entity_url(kind, id);
        debug!(%url, "PATCH");
        let resp = self
            .client
            .patch(&url)
            .json(&encode_payload(payload))
            .send()
            .await
            .map_err(transport_error)?;
        let body: Value = check_status(resp).await?.json().await.map_err(transport_error)?;
        decode_entity(body)
    }

    async fn delete(&self, kind: EntityKind, id: &RecordId) -> Result<(), RemoteError> {
        let url = self.entity_url(kind, id);
        debug!(%url, "DELETE");
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(resp).await?;
        Ok(())
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<EntityRecord>, RemoteError> {
        let url = self.collection_url(kind);
        debug!(%url, "GET");
        let resp = self.client.get(&url).send().await.map_err(transport_error)?;
        let body: Value = check_status(resp).await?.json().await.map_err(transport_error)?;
        match body {
            Value::Array(items) => items.into_iter().map(decode_entity).collect(),
            _ => Err(RemoteError::Decode("expected a JSON array".into())),
        }
    }
}
