use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Previous hash mismatch: expected {expected}, got {got}")]
    TipMismatch { expected: String, got: String },

    #[error("Block count mismatch: expected {expected}, got {got}")]
    CountMismatch { expected: u64, got: u64 },

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Consumer already active")]
    ConsumerActive,

    #[error("Corrupt undo journal: {0}")]
    CorruptJournal(String),

    #[error("Block not found: {0}")]
    NotFound(String),

    #[error("State error: {0}")]
    State(#[from] accord_state::StateError),

    #[error("Core error: {0}")]
    Core(#[from] accord_core::CoreError),
}
