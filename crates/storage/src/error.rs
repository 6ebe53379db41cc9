use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not a data collection: {0}")]
    NotADataCollection(String),

    #[error("local store unavailable: {0}")]
    Unavailable(String),

    #[error("core error: {0}")]
    Core(#[from] tripledger_core::CoreError),
}
