use thiserror::Error;

use crate::acnode::AcNodeStatus;
use crate::validator::ValidatorStatus;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Illegal validator transition: {from:?} -> {to:?}")]
    IllegalValidatorTransition {
        from: ValidatorStatus,
        to: ValidatorStatus,
    },

    #[error("Illegal node transition: {from:?} -> {to:?}")]
    IllegalNodeTransition { from: AcNodeStatus, to: AcNodeStatus },

    #[error("Node {id} is not ACTIVE (currently {status:?})")]
    NodeNotActive { id: String, status: AcNodeStatus },

    #[error("Insufficient officer signatures: have {have}, need {need}")]
    InsufficientSignatures { have: usize, need: usize },

    #[error("Signer not authorized: {0}")]
    UnauthorizedSigner(String),

    #[error("Jurisdiction not approved: {0}")]
    JurisdictionNotApproved(String),

    #[error("Attested assets below minimum: have {have}, need {need}")]
    InsufficientAssets { have: u64, need: u64 },

    #[error("Deposit insufficient: required {required}, actual {actual}")]
    DepositInsufficient { required: u64, actual: u64 },

    #[error("Unbonding delay has not elapsed")]
    UnbondingNotElapsed,

    #[error("Slashing case already resolved: {0}")]
    CaseAlreadyResolved(String),

    #[error("Slashing case not found: {0}")]
    CaseNotFound(String),

    #[error("State error: {0}")]
    State(#[from] accord_state::StateError),

    #[error("Core error: {0}")]
    Core(#[from] accord_core::CoreError),
}
