use serde::{Deserialize, Serialize};

use crate::crypto::{hash_blake3, merkle_root, sign, verify, Hash, PublicKey, SecretKey, Sig};
use crate::error::CoreError;
use crate::serialize;
use crate::types::transaction::Transaction;
use crate::types::NodeId;

/// Block header containing metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Chain identifier, for replay protection
    pub chain_id: u64,
    /// Sequential block count (0 for genesis)
    pub height: u64,
    /// Hash of the previous block (zeros for genesis)
    pub prev_hash: Hash,
    /// Unix timestamp, milliseconds
    pub timestamp: u64,
    /// Merkle root of transactions
    pub tx_root: Hash,
    /// Coordinator that proposed the block
    pub proposer: PublicKey,
    /// Accountable node the block is produced under
    pub producer: NodeId,
}

impl BlockHeader {
    /// Compute the hash of this header
    pub fn hash(&self) -> Result<Hash, CoreError> {
        let bytes = serialize::to_bytes(self)?;
        Ok(hash_blake3(&bytes))
    }
}

/// A single validator's approval of a block hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub block_hash: Hash,
    pub validator: PublicKey,
    pub signature: Sig,
    /// Unix milliseconds at signing time
    pub timestamp: u64,
}

impl Approval {
    /// Sign a block hash as a validator
    pub fn sign_for(
        block_hash: Hash,
        validator: PublicKey,
        secret_key: &SecretKey,
        timestamp: u64,
    ) -> Self {
        let signature = sign(secret_key, block_hash.as_bytes());
        Approval {
            block_hash,
            validator,
            signature,
            timestamp,
        }
    }

    /// Verify the approval signature against its block hash
    pub fn verify(&self) -> Result<(), CoreError> {
        verify(&self.validator, self.block_hash.as_bytes(), &self.signature)
    }
}

/// The approval set that finalized a block. Archived alongside the block
/// for audit once the block commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitCertificate {
    pub block_hash: Hash,
    pub epoch_id: u64,
    pub slot: u64,
    pub approvals: Vec<Approval>,
    pub commit_timestamp: u64,
}

impl CommitCertificate {
    /// Verify every approval signature and that signers are distinct members
    /// of the given active set reaching the quorum count.
    pub fn verify(&self, active_set: &[PublicKey], quorum: usize) -> Result<(), CoreError> {
        let mut seen = std::collections::HashSet::new();
        for approval in &self.approvals {
            if approval.block_hash != self.block_hash {
                return Err(CoreError::InvalidSignature);
            }
            if !active_set.contains(&approval.validator) {
                return Err(CoreError::InvalidPublicKey);
            }
            approval.verify()?;
            seen.insert(approval.validator);
        }
        if seen.len() < quorum {
            return Err(CoreError::InvalidSignature);
        }
        Ok(())
    }
}

/// A complete block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, txs: Vec<Transaction>) -> Self {
        Block { header, txs }
    }

    /// Compute the block hash (hash of header)
    pub fn hash(&self) -> Result<Hash, CoreError> {
        self.header.hash()
    }

    /// Compute the merkle root of transactions
    pub fn compute_tx_root(&self) -> Result<Hash, CoreError> {
        let tx_ids: Result<Vec<Hash>, _> = self.txs.iter().map(|tx| tx.id()).collect();
        Ok(merkle_root(&tx_ids?))
    }

    /// Verify that tx_root matches transactions
    pub fn verify_tx_root(&self) -> Result<bool, CoreError> {
        Ok(self.compute_tx_root()? == self.header.tx_root)
    }

    /// Total transaction value (TV) carried by this block, used by the
    /// deposit sufficiency check D >= multiplier * TV.
    pub fn total_value(&self) -> u64 {
        self.txs
            .iter()
            .fold(0u64, |acc, tx| acc.saturating_add(tx.amount))
    }

    /// Whether transactions appear in arrival order (timestamp, then salt).
    /// Violations are malicious-ordering fraud candidates.
    pub fn is_arrival_ordered(&self) -> bool {
        self.txs
            .windows(2)
            .all(|pair| pair[0].arrival_key() <= pair[1].arrival_key())
    }
}

/// Per-block index record, stored under `bidx/<hash>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockIndex {
    pub hash: Hash,
    /// Sequential block number (genesis = 0)
    pub block_count: u64,
    pub timestamp: u64,
    pub tx_count: u64,
    pub total_value: u64,
    pub producer: NodeId,
}

impl BlockIndex {
    pub fn from_block(block: &Block, block_count: u64) -> Result<Self, CoreError> {
        Ok(BlockIndex {
            hash: block.hash()?,
            block_count,
            timestamp: block.header.timestamp,
            tx_count: block.txs.len() as u64,
            total_value: block.total_value(),
            producer: block.header.producer.clone(),
        })
    }
}

/// Genesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub chain_id: u64,
    pub timestamp: u64,
    pub validators: Vec<PublicKey>,
}

impl GenesisConfig {
    /// Create the genesis block from this config
    pub fn create_genesis_block(&self) -> Block {
        let header = BlockHeader {
            chain_id: self.chain_id,
            height: 0,
            prev_hash: Hash::ZERO,
            timestamp: self.timestamp,
            tx_root: Hash::ZERO,
            proposer: PublicKey::default(),
            producer: NodeId::new("genesis"),
        };

        Block::new(header, Vec::new())
    }
}
