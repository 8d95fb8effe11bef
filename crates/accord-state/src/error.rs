use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt record at key {0}")]
    CorruptRecord(String),

    #[error("Core error: {0}")]
    Core(#[from] accord_core::CoreError),
}
