use thiserror::Error;
use tripledger_core::CoreError;
use tripledger_storage::StorageError;

use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("malformed mutation: {0}")]
    MalformedMutation(String),

    #[error("unresolved temporary id: {0}")]
    UnresolvedTempId(String),
}
