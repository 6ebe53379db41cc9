use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
