use std::collections::HashSet;

use accord_core::{Approval, Hash, PublicKey};
use tracing::debug;

use crate::error::ConsensusError;
use crate::messages::CommitMsg;

/// Collects validator approvals for one proposed block until quorum.
/// Approvals must come from distinct members of the active set and
/// reference the tracked block hash.
pub struct ApprovalTracker {
    epoch_id: u64,
    slot: u64,
    block_hash: Hash,
    approvals: Vec<Approval>,
    active_set: HashSet<PublicKey>,
    quorum: usize,
}

impl ApprovalTracker {
    pub fn new(
        epoch_id: u64,
        slot: u64,
        block_hash: Hash,
        active_set: &[PublicKey],
        quorum: usize,
    ) -> Self {
        ApprovalTracker {
            epoch_id,
            slot,
            block_hash,
            approvals: Vec::new(),
            active_set: active_set.iter().copied().collect(),
            quorum,
        }
    }

    pub fn block_hash(&self) -> Hash {
        self.block_hash
    }

    /// Add a validator approval. Returns whether quorum is now reached.
    /// Duplicates are ignored rather than rejected: the transport is
    /// at-least-once.
    pub fn add(&mut self, approval: Approval) -> Result<bool, ConsensusError> {
        if approval.block_hash != self.block_hash {
            return Err(ConsensusError::InvalidBlock(format!(
                "approval references {} but round is for {}",
                approval.block_hash, self.block_hash
            )));
        }

        if !self.active_set.contains(&approval.validator) {
            return Err(ConsensusError::ValidatorNotInSet(
                approval.validator.to_hex(),
            ));
        }

        approval.verify()?;

        if self
            .approvals
            .iter()
            .any(|a| a.validator == approval.validator)
        {
            debug!("Duplicate approval from {}", approval.validator);
            return Ok(self.has_quorum());
        }

        debug!(
            "Approval from {} ({}/{})",
            approval.validator,
            self.approvals.len() + 1,
            self.quorum
        );
        self.approvals.push(approval);

        Ok(self.has_quorum())
    }

    pub fn has_quorum(&self) -> bool {
        self.approvals.len() >= self.quorum
    }

    pub fn approval_count(&self) -> usize {
        self.approvals.len()
    }

    /// Assemble the commit message (only once quorum is reached)
    pub fn to_commit(&self, commit_timestamp: u64) -> Result<CommitMsg, ConsensusError> {
        if !self.has_quorum() {
            return Err(ConsensusError::InsufficientApprovals {
                have: self.approvals.len(),
                need: self.quorum,
            });
        }

        Ok(CommitMsg {
            epoch_id: self.epoch_id,
            slot: self.slot,
            block_hash: self.block_hash,
            approvals: self.approvals.clone(),
            commit_timestamp,
        })
    }
}
