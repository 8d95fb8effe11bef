//! Accord Consensus - The Proof of Collaboration engine
//!
//! A rotating coordinator proposes blocks, a seeded validator quorum
//! approves them, and accountable deposit-backed nodes carry liability for
//! what gets produced. This crate drives the engine state machine, the
//! epoch/slot schedule, approval collection, and the fraud monitor.

pub mod approvals;
pub mod config;
pub mod engine;
pub mod error;
pub mod fraud;
pub mod messages;
pub mod scheduler;
pub mod status;

pub use approvals::ApprovalTracker;
pub use config::{constants, BlockMode, DevOptions, EngineConfig, Network};
pub use engine::{EngineContext, PeerEndpoint, PocEngine};
pub use error::ConsensusError;
pub use fraud::FraudMonitor;
pub use messages::{
    within_drift, ApprovalMsg, CommitMsg, CommitRequest, CommitResponse, ProposalMsg,
    ProposalResponse,
};
pub use scheduler::{epoch_seed, quorum_size, EpochInfo, EpochSchedule, EpochStats};
pub use status::{EnginePhase, EngineStatus, NodeRole, ShadowRole, TipInfo};
