//! Accord Registry - Validator and accountable-node registries
//!
//! Tracks validator and accountable-node lifecycles through explicit state
//! machines, keeps slashing cases, and maintains the collaboration
//! whitelist/blacklist. Registries cache records in memory and persist
//! through the `accord-state` storage under the canonical key prefixes.

pub mod acnode;
pub mod error;
pub mod lists;
pub mod slashing;
pub mod validator;

pub use acnode::{
    admission_signing_bytes, default_jurisdictions, AccountableNodeRecord,
    AccountableNodeRegistry, AcNodeStatus, DepositRecord, LegalDisclosure, Officer,
    RegistryConfig, VerificationEvidence,
};
pub use error::RegistryError;
pub use lists::{BlacklistEntry, CollaborationLists, WhitelistEntry};
pub use slashing::{
    CaseResolution, CaseStatus, Evidence, EvidenceDetail, FraudKind, FraudReport, Party,
    PenaltyRoute, ResolutionAction, SlashingCase, SlashingDocket,
};
pub use validator::{ConsortiumBinding, ValidatorRecord, ValidatorRegistry, ValidatorStatus};
