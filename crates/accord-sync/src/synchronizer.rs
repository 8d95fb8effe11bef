use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use accord_core::{serialize, Block, CommitCertificate, Hash};
use accord_core::BlockIndex;
use accord_state::{Storage, StoreKey, WriteOp};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::transport::{BlockEnvelope, BlockTransport, PeerBlockSource, MAX_INVENTORY_PER_REQUEST};

/// Synchronizer configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Blocks behind the tip after which undo entries are pruned
    pub finality_depth: u64,
    /// Transport publish retry attempts before giving up
    pub max_publish_retries: u32,
    /// Base backoff between publish retries, doubled per attempt
    pub retry_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            finality_depth: 16,
            max_publish_retries: 3,
            retry_backoff_ms: 100,
        }
    }
}

/// Current chain head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTip {
    pub block_count: u64,
    pub hash: Hash,
}

/// Outcome of one apply attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Published marker already present; replay was a no-op
    AlreadyApplied,
}

/// Pre-image of one storage mutation made while applying a block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoRecord {
    pub key: Vec<u8>,
    /// The value before the mutation, None if the key did not exist
    pub prev: Option<Vec<u8>>,
}

/// What restart recovery did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub rolled_back: usize,
    pub applied: usize,
}

/// Applies blocks to chain state exactly once and keeps the undo journal.
/// All mutation goes through the storage write lock, so one block
/// application is in flight at a time; readers are never blocked out.
pub struct BlockSynchronizer<S: Storage> {
    storage: Arc<RwLock<S>>,
    transport: Arc<dyn BlockTransport>,
    config: SyncConfig,
}

impl<S: Storage> BlockSynchronizer<S> {
    pub fn new(
        storage: Arc<RwLock<S>>,
        transport: Arc<dyn BlockTransport>,
        config: SyncConfig,
    ) -> Self {
        BlockSynchronizer {
            storage,
            transport,
            config,
        }
    }

    pub fn transport(&self) -> &Arc<dyn BlockTransport> {
        &self.transport
    }

    /// Read the current tip, if the chain is initialized
    pub async fn tip(&self) -> Result<Option<ChainTip>, SyncError> {
        let storage = self.storage.read().await;
        Ok(read_tip(&*storage))
    }

    /// Whether a block has been fully applied (published marker present)
    pub async fn is_applied(&self, hash: &Hash) -> bool {
        let storage = self.storage.read().await;
        storage.exists(StoreKey::published_marker(hash).as_bytes())
    }

    pub async fn get_block(&self, hash: &Hash) -> Result<Option<Block>, SyncError> {
        let storage = self.storage.read().await;
        match storage.get(StoreKey::block_data(hash).as_bytes()) {
            Some(bytes) => Ok(Some(serialize::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn block_by_count(&self, block_count: u64) -> Result<Option<Block>, SyncError> {
        let storage = self.storage.read().await;
        let Some(hash_bytes) = storage.get(StoreKey::block_count_index(block_count).as_bytes())
        else {
            return Ok(None);
        };
        let hash = Hash::from_slice(&hash_bytes)
            .ok_or_else(|| SyncError::NotFound(format!("bad hash at count {block_count}")))?;
        match storage.get(StoreKey::block_data(&hash).as_bytes()) {
            Some(bytes) => Ok(Some(serialize::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn certificate(&self, hash: &Hash) -> Result<Option<CommitCertificate>, SyncError> {
        let storage = self.storage.read().await;
        match storage.get(StoreKey::commit_certificate(hash).as_bytes()) {
            Some(bytes) => Ok(Some(serialize::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Apply a block to chain state. Idempotent: a block whose published
    /// marker exists is skipped. The undo journal entry batch is written
    /// before the mutation batch, so a crash in between is detectable and
    /// reversible on recovery.
    pub async fn apply_block(&self, envelope: &BlockEnvelope) -> Result<ApplyOutcome, SyncError> {
        let mut storage = self.storage.write().await;
        self.apply_locked(&mut *storage, envelope)
    }

    /// Apply a locally produced block, then republish it over the transport
    /// with backoff. Local durability comes first; an exhausted retry budget
    /// surfaces as a transport error for the engine to act on.
    pub async fn publish(&self, envelope: BlockEnvelope) -> Result<ApplyOutcome, SyncError> {
        let outcome = self.apply_block(&envelope).await?;

        let mut backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let mut last_err = None;
        for attempt in 0..self.config.max_publish_retries {
            match self.transport.publish_block(envelope.clone()) {
                Ok(()) => {
                    debug!("Republished block {} over transport", envelope.block_count);
                    return Ok(outcome);
                }
                Err(err) => {
                    warn!(
                        "Transport publish failed (attempt {}): {}",
                        attempt + 1,
                        err
                    );
                    last_err = Some(err);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            SyncError::TransportUnavailable("publish retries exhausted".to_string())
        }))
    }

    /// Roll back an applied (or partially applied) block using its undo
    /// entries. Restores every journaled pre-image and removes the journal
    /// and the published marker in one atomic batch.
    pub async fn rollback_block(&self, block_count: u64, hash: &Hash) -> Result<(), SyncError> {
        let mut storage = self.storage.write().await;
        rollback_locked(&mut *storage, block_count, hash)
    }

    /// Restart recovery: unwind partially applied blocks (undo entries
    /// present but no published marker), then catch up from peers, verifying
    /// each block against the local tip before applying.
    pub async fn recover(&self, peers: &dyn PeerBlockSource) -> Result<RecoveryReport, SyncError> {
        let mut report = RecoveryReport::default();

        {
            let mut storage = self.storage.write().await;
            let mut partial: BTreeSet<(u64, Hash)> = BTreeSet::new();

            for key in storage.keys_with_prefix(StoreKey::undo_prefix().as_bytes()) {
                let (block_count, hash, _) = parse_undo_key(&key)?;
                if !storage.exists(StoreKey::published_marker(&hash).as_bytes()) {
                    partial.insert((block_count, hash));
                }
            }

            // Unwind newest first so tip pre-images restore cleanly
            for (block_count, hash) in partial.iter().rev() {
                warn!(
                    "Unwinding partially applied block {} at count {}",
                    hash, block_count
                );
                rollback_locked(&mut *storage, *block_count, hash)?;
                report.rolled_back += 1;
            }
        }

        loop {
            let from = match self.tip().await? {
                Some(tip) => tip.block_count + 1,
                None => 0,
            };

            let batch = peers.fetch_blocks(from, MAX_INVENTORY_PER_REQUEST)?;
            if batch.is_empty() {
                break;
            }

            for envelope in batch {
                match self.apply_block(&envelope).await? {
                    ApplyOutcome::Applied => report.applied += 1,
                    ApplyOutcome::AlreadyApplied => {}
                }
            }
        }

        info!(
            "Recovery complete: {} rolled back, {} applied",
            report.rolled_back, report.applied
        );
        Ok(report)
    }

    fn apply_locked(
        &self,
        storage: &mut S,
        envelope: &BlockEnvelope,
    ) -> Result<ApplyOutcome, SyncError> {
        let block = &envelope.block;
        let hash = block.hash()?;

        if storage.exists(StoreKey::published_marker(&hash).as_bytes()) {
            debug!("Block {} already applied, skipping", hash);
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        // Chain linkage against the local tip
        match read_tip(storage) {
            Some(tip) => {
                if envelope.block_count != tip.block_count + 1 {
                    return Err(SyncError::CountMismatch {
                        expected: tip.block_count + 1,
                        got: envelope.block_count,
                    });
                }
                if block.header.prev_hash != tip.hash {
                    return Err(SyncError::TipMismatch {
                        expected: tip.hash.to_hex(),
                        got: block.header.prev_hash.to_hex(),
                    });
                }
            }
            None => {
                if envelope.block_count != 0 {
                    return Err(SyncError::CountMismatch {
                        expected: 0,
                        got: envelope.block_count,
                    });
                }
                if block.header.prev_hash != Hash::ZERO {
                    return Err(SyncError::TipMismatch {
                        expected: Hash::ZERO.to_hex(),
                        got: block.header.prev_hash.to_hex(),
                    });
                }
            }
        }

        if !block.verify_tx_root()? {
            return Err(SyncError::NotFound(format!(
                "transaction root mismatch in block {hash}"
            )));
        }

        let index = BlockIndex::from_block(block, envelope.block_count)?;

        let mut mutations: Vec<(StoreKey, Vec<u8>)> = vec![
            (StoreKey::block_data(&hash), serialize::to_bytes(block)?),
            (StoreKey::block_index(&hash), serialize::to_bytes(&index)?),
            (
                StoreKey::block_count_index(envelope.block_count),
                hash.to_vec(),
            ),
            (StoreKey::meta_tip(), hash.to_vec()),
            (
                StoreKey::meta_block_count(),
                envelope.block_count.to_le_bytes().to_vec(),
            ),
        ];
        if let Some(cert) = &envelope.certificate {
            mutations.push((
                StoreKey::commit_certificate(&hash),
                serialize::to_bytes(cert)?,
            ));
        }

        // Journal pre-images first, in their own atomic batch
        let mut undo_ops = Vec::with_capacity(mutations.len());
        for (seq, (key, _)) in mutations.iter().enumerate() {
            let record = UndoRecord {
                key: key.as_bytes().to_vec(),
                prev: storage.get(key.as_bytes()),
            };
            undo_ops.push(WriteOp::put(
                StoreKey::undo_entry(envelope.block_count, &hash, seq as u32),
                serialize::to_bytes(&record)?,
            ));
        }
        storage.write_batch(undo_ops)?;

        // Mutations and the published marker commit together
        let mut ops: Vec<WriteOp> = mutations
            .into_iter()
            .map(|(key, value)| WriteOp::put(key, value))
            .collect();
        ops.push(WriteOp::put(
            StoreKey::published_marker(&hash),
            block.header.timestamp.to_le_bytes().to_vec(),
        ));
        storage.write_batch(ops)?;

        self.prune_undo(storage, envelope.block_count)?;

        info!(
            "Applied block {} at count {} ({} txs, value {})",
            hash,
            envelope.block_count,
            block.txs.len(),
            block.total_value()
        );

        Ok(ApplyOutcome::Applied)
    }

    /// Delete undo entries for blocks beyond the rollback window
    fn prune_undo(&self, storage: &mut S, tip_count: u64) -> Result<(), SyncError> {
        let Some(cutoff) = tip_count.checked_sub(self.config.finality_depth) else {
            return Ok(());
        };

        let mut ops = Vec::new();
        for key in storage.keys_with_prefix(StoreKey::undo_prefix().as_bytes()) {
            let (block_count, _, _) = parse_undo_key(&key)?;
            if block_count < cutoff {
                ops.push(WriteOp::Del { key });
            }
        }

        if !ops.is_empty() {
            debug!("Pruning {} undo entries behind count {}", ops.len(), cutoff);
            storage.write_batch(ops)?;
        }
        Ok(())
    }
}

fn read_tip<S: Storage>(storage: &S) -> Option<ChainTip> {
    let hash_bytes = storage.get(StoreKey::meta_tip().as_bytes())?;
    let count_bytes = storage.get(StoreKey::meta_block_count().as_bytes())?;
    let hash = Hash::from_slice(&hash_bytes)?;
    if count_bytes.len() != 8 {
        return None;
    }
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&count_bytes);
    Some(ChainTip {
        block_count: u64::from_le_bytes(arr),
        hash,
    })
}

fn rollback_locked<S: Storage>(
    storage: &mut S,
    block_count: u64,
    hash: &Hash,
) -> Result<(), SyncError> {
    let prefix = StoreKey::undo_block_prefix(block_count, hash);
    let keys = storage.keys_with_prefix(prefix.as_bytes());
    if keys.is_empty() {
        return Err(SyncError::NotFound(format!(
            "no undo entries for block {hash} at count {block_count}"
        )));
    }

    let mut records = Vec::with_capacity(keys.len());
    for key in &keys {
        let bytes = storage
            .get(key)
            .ok_or_else(|| SyncError::CorruptJournal(format!("missing entry {:?}", key)))?;
        let record: UndoRecord = serialize::from_bytes(&bytes)
            .map_err(|e| SyncError::CorruptJournal(e.to_string()))?;
        records.push(record);
    }

    let mut ops = Vec::with_capacity(records.len() + keys.len() + 1);
    // Restore pre-images in reverse mutation order
    for record in records.into_iter().rev() {
        match record.prev {
            Some(value) => ops.push(WriteOp::Put {
                key: record.key,
                value,
            }),
            None => ops.push(WriteOp::Del { key: record.key }),
        }
    }
    for key in keys {
        ops.push(WriteOp::Del { key });
    }
    ops.push(WriteOp::del(StoreKey::published_marker(hash)));

    storage.write_batch(ops)?;
    info!("Rolled back block {} at count {}", hash, block_count);
    Ok(())
}

/// Parse `undo/<count>/<hash>/<seq>` back into its components
fn parse_undo_key(key: &[u8]) -> Result<(u64, Hash, u32), SyncError> {
    let text = std::str::from_utf8(key)
        .map_err(|_| SyncError::CorruptJournal("non-utf8 undo key".to_string()))?;
    let rest = text
        .strip_prefix("undo/")
        .ok_or_else(|| SyncError::CorruptJournal(format!("bad undo key {text}")))?;

    let mut parts = rest.split('/');
    let count = parts
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| SyncError::CorruptJournal(format!("bad undo count in {text}")))?;
    let hash = parts
        .next()
        .and_then(|s| Hash::from_hex(s).ok())
        .ok_or_else(|| SyncError::CorruptJournal(format!("bad undo hash in {text}")))?;
    let seq = parts
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| SyncError::CorruptJournal(format!("bad undo seq in {text}")))?;

    Ok((count, hash, seq))
}
