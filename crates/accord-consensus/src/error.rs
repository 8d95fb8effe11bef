use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Engine is stopped: {0}")]
    EngineStopped(String),

    #[error("Not the slot coordinator")]
    NotCoordinator,

    #[error("Proposal from non-coordinator {0}")]
    UnexpectedCoordinator(String),

    #[error("Message timestamp {message_ts} outside drift tolerance (now {now})")]
    ClockDrift { message_ts: u64, now: u64 },

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Producer not eligible: {0}")]
    ProducerIneligible(String),

    #[error("Insufficient approvals: have {have}, need {need}")]
    InsufficientApprovals { have: usize, need: usize },

    #[error("Validator not in active set: {0}")]
    ValidatorNotInSet(String),

    #[error("No round in progress for epoch {epoch_id} slot {slot}")]
    NoSuchRound { epoch_id: u64, slot: u64 },

    #[error("Chain not initialized")]
    ChainNotInitialized,

    #[error("Core error: {0}")]
    Core(#[from] accord_core::CoreError),

    #[error("State error: {0}")]
    State(#[from] accord_state::StateError),

    #[error("Registry error: {0}")]
    Registry(#[from] accord_registry::RegistryError),

    #[error("Mempool error: {0}")]
    Mempool(#[from] accord_mempool::MempoolError),

    #[error("Sync error: {0}")]
    Sync(#[from] accord_sync::SyncError),
}
