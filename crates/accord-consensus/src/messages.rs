use accord_core::{
    serialize, sign, verify, Approval, Block, CommitCertificate, CoreError, Hash, PublicKey,
    SecretKey, Sig,
};
use serde::{Deserialize, Serialize};

/// True when a message timestamp is within the drift tolerance of local
/// time. Out-of-window messages are rejected outright, not delayed.
pub fn within_drift(message_ts: u64, now: u64, max_drift_ms: u64) -> bool {
    now.abs_diff(message_ts) <= max_drift_ms
}

/// A coordinator's block proposal for one slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalMsg {
    pub epoch_id: u64,
    pub slot: u64,
    pub block: Block,
    pub coordinator: PublicKey,
    pub signature: Sig,
    /// Unix milliseconds at send time
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProposalSigningData {
    epoch_id: u64,
    slot: u64,
    block_hash: Hash,
    coordinator: PublicKey,
    timestamp: u64,
}

impl ProposalMsg {
    pub fn new_signed(
        epoch_id: u64,
        slot: u64,
        block: Block,
        coordinator: PublicKey,
        secret_key: &SecretKey,
        timestamp: u64,
    ) -> Result<Self, CoreError> {
        let block_hash = block.hash()?;
        let bytes = serialize::to_bytes(&ProposalSigningData {
            epoch_id,
            slot,
            block_hash,
            coordinator,
            timestamp,
        })?;
        Ok(ProposalMsg {
            epoch_id,
            slot,
            block,
            coordinator,
            signature: sign(secret_key, &bytes),
            timestamp,
        })
    }

    pub fn verify_signature(&self) -> Result<(), CoreError> {
        let bytes = serialize::to_bytes(&ProposalSigningData {
            epoch_id: self.epoch_id,
            slot: self.slot,
            block_hash: self.block.hash()?,
            coordinator: self.coordinator,
            timestamp: self.timestamp,
        })?;
        verify(&self.coordinator, &bytes, &self.signature)
    }
}

/// A validator's approval of a proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalMsg {
    pub epoch_id: u64,
    pub slot: u64,
    pub block_hash: Hash,
    pub approval: Approval,
}

/// The coordinator's commit announcement once quorum is reached. The
/// approval set travels with it and is archived alongside the block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitMsg {
    pub epoch_id: u64,
    pub slot: u64,
    pub block_hash: Hash,
    pub approvals: Vec<Approval>,
    pub commit_timestamp: u64,
}

impl CommitMsg {
    pub fn to_certificate(&self) -> CommitCertificate {
        CommitCertificate {
            block_hash: self.block_hash,
            epoch_id: self.epoch_id,
            slot: self.slot,
            approvals: self.approvals.clone(),
            commit_timestamp: self.commit_timestamp,
        }
    }
}

/// Reply to a proposal delivery: the validator's approval, if it signed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalResponse {
    pub approval: Option<ApprovalMsg>,
}

/// Commit delivery to peers that may not hold the block yet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    pub commit: CommitMsg,
    pub block: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResponse {
    pub status: String,
    pub block_count: u64,
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::{GenesisConfig, KeyPair};

    fn test_block() -> Block {
        GenesisConfig {
            chain_id: 1,
            timestamp: 0,
            validators: vec![],
        }
        .create_genesis_block()
    }

    #[test]
    fn test_proposal_signature_roundtrip() {
        let coordinator = KeyPair::generate();
        let msg = ProposalMsg::new_signed(
            2,
            70,
            test_block(),
            coordinator.public,
            &coordinator.secret,
            1_700_000_000_000,
        )
        .unwrap();

        assert!(msg.verify_signature().is_ok());
    }

    #[test]
    fn test_tampered_proposal_rejected() {
        let coordinator = KeyPair::generate();
        let mut msg = ProposalMsg::new_signed(
            2,
            70,
            test_block(),
            coordinator.public,
            &coordinator.secret,
            1_700_000_000_000,
        )
        .unwrap();

        msg.slot += 1;
        assert!(msg.verify_signature().is_err());
    }

    #[test]
    fn test_drift_window() {
        assert!(within_drift(1000, 1400, 500));
        assert!(within_drift(1400, 1000, 500));
        assert!(within_drift(1000, 1500, 500));
        assert!(!within_drift(1000, 1501, 500));
        assert!(!within_drift(2000, 1000, 500));
    }

    #[test]
    fn test_commit_to_certificate() {
        let block = test_block();
        let hash = block.hash().unwrap();
        let validator = KeyPair::generate();
        let approval = Approval::sign_for(hash, validator.public, &validator.secret, 5);

        let commit = CommitMsg {
            epoch_id: 1,
            slot: 33,
            block_hash: hash,
            approvals: vec![approval],
            commit_timestamp: 10,
        };

        let cert = commit.to_certificate();
        assert_eq!(cert.block_hash, hash);
        assert_eq!(cert.slot, 33);
        assert_eq!(cert.approvals.len(), 1);
    }
}
