use std::collections::{BTreeMap, HashMap, HashSet};

use accord_core::{serialize, Hash, PublicKey, Transaction};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Configuration for the mempool
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Maximum number of transactions in the pool
    pub max_size: usize,
    /// Maximum transactions per sender
    pub max_per_sender: usize,
    /// Transaction expiry in milliseconds
    pub expiry_ms: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            max_size: 10_000,
            max_per_sender: 100,
            expiry_ms: 60 * 60 * 1000,
        }
    }
}

/// A pending transaction in the mempool
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub tx: Transaction,
    pub id: Hash,
    /// Serialized size, counted against the block byte budget
    pub size_bytes: usize,
    pub added_at: u64,
}

/// The transaction pool. Indexed by id and by sender; iteration for block
/// building follows the arrival key (timestamp, salt).
pub struct Mempool {
    config: MempoolConfig,
    by_id: RwLock<HashMap<Hash, PendingTransaction>>,
    by_sender: RwLock<HashMap<PublicKey, HashSet<Hash>>>,
    by_arrival: RwLock<BTreeMap<(u64, [u8; 16], Hash), Hash>>,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Mempool {
            config,
            by_id: RwLock::new(HashMap::new()),
            by_sender: RwLock::new(HashMap::new()),
            by_arrival: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add a transaction to the pool. `now` is the local receipt time used
    /// for expiry, unix milliseconds.
    pub async fn add(&self, tx: Transaction, now: u64) -> Result<Hash, MempoolError> {
        let id = tx.id().map_err(|_| MempoolError::InvalidTransaction)?;
        let size_bytes = serialize::to_bytes(&tx)
            .map_err(|_| MempoolError::InvalidTransaction)?
            .len();

        let mut by_id = self.by_id.write().await;
        let mut by_sender = self.by_sender.write().await;
        let mut by_arrival = self.by_arrival.write().await;

        if by_id.contains_key(&id) {
            return Err(MempoolError::AlreadyExists);
        }

        if by_id.len() >= self.config.max_size {
            return Err(MempoolError::PoolFull);
        }

        let sender_txs = by_sender.entry(tx.from).or_default();
        if sender_txs.len() >= self.config.max_per_sender {
            return Err(MempoolError::SenderLimitReached);
        }

        let (timestamp, salt) = tx.arrival_key();
        let pending = PendingTransaction {
            tx,
            id,
            size_bytes,
            added_at: now,
        };

        sender_txs.insert(id);
        by_arrival.insert((timestamp, salt, id), id);
        by_id.insert(id, pending);

        debug!("Added transaction {} to mempool", id);

        Ok(id)
    }

    /// Take up to `max_txs` transactions not exceeding `max_bytes` in total,
    /// in arrival order. Transactions stay pooled until committed.
    pub async fn take_batch(&self, max_txs: usize, max_bytes: usize) -> Vec<Transaction> {
        let by_id = self.by_id.read().await;
        let by_arrival = self.by_arrival.read().await;

        let mut batch = Vec::new();
        let mut total_bytes = 0usize;

        for id in by_arrival.values() {
            if batch.len() >= max_txs {
                break;
            }
            let Some(pending) = by_id.get(id) else {
                continue;
            };
            if total_bytes + pending.size_bytes > max_bytes && !batch.is_empty() {
                break;
            }
            total_bytes += pending.size_bytes;
            batch.push(pending.tx.clone());
        }

        batch
    }

    pub async fn get(&self, id: &Hash) -> Option<Transaction> {
        let by_id = self.by_id.read().await;
        by_id.get(id).map(|p| p.tx.clone())
    }

    pub async fn contains(&self, id: &Hash) -> bool {
        let by_id = self.by_id.read().await;
        by_id.contains_key(id)
    }

    /// Remove transactions that have been included in a committed block
    pub async fn remove_committed(&self, tx_ids: &[Hash]) {
        let mut by_id = self.by_id.write().await;
        let mut by_sender = self.by_sender.write().await;
        let mut by_arrival = self.by_arrival.write().await;

        for id in tx_ids {
            Self::remove_locked(id, &mut by_id, &mut by_sender, &mut by_arrival);
        }
    }

    /// Drop transactions older than the expiry window
    pub async fn remove_expired(&self, now: u64) {
        let threshold = now.saturating_sub(self.config.expiry_ms);

        let mut by_id = self.by_id.write().await;
        let mut by_sender = self.by_sender.write().await;
        let mut by_arrival = self.by_arrival.write().await;

        let expired: Vec<Hash> = by_id
            .iter()
            .filter(|(_, p)| p.added_at < threshold)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            Self::remove_locked(&id, &mut by_id, &mut by_sender, &mut by_arrival);
            warn!("Removed expired transaction {}", id);
        }
    }

    pub async fn size(&self) -> usize {
        let by_id = self.by_id.read().await;
        by_id.len()
    }

    fn remove_locked(
        id: &Hash,
        by_id: &mut HashMap<Hash, PendingTransaction>,
        by_sender: &mut HashMap<PublicKey, HashSet<Hash>>,
        by_arrival: &mut BTreeMap<(u64, [u8; 16], Hash), Hash>,
    ) {
        if let Some(pending) = by_id.remove(id) {
            if let Some(sender_txs) = by_sender.get_mut(&pending.tx.from) {
                sender_txs.remove(id);
                if sender_txs.is_empty() {
                    by_sender.remove(&pending.tx.from);
                }
            }
            let (timestamp, salt) = pending.tx.arrival_key();
            by_arrival.remove(&(timestamp, salt, *id));
        }
    }
}

/// Mempool errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum MempoolError {
    #[error("Transaction already exists in mempool")]
    AlreadyExists,

    #[error("Mempool is full")]
    PoolFull,

    #[error("Sender has reached transaction limit")]
    SenderLimitReached,

    #[error("Invalid transaction")]
    InvalidTransaction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::KeyPair;

    fn test_tx(sender: &KeyPair, timestamp: u64, amount: u64) -> Transaction {
        Transaction::new_signed(
            1,
            sender.public,
            KeyPair::generate().public,
            amount,
            1,
            timestamp,
            &sender.secret,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let mempool = Mempool::new(MempoolConfig::default());
        let sender = KeyPair::generate();
        let tx = test_tx(&sender, 1000, 100);
        let id = tx.id().unwrap();

        mempool.add(tx, 1000).await.unwrap();

        let fetched = mempool.get(&id).await.unwrap();
        assert_eq!(fetched.amount, 100);
    }

    #[tokio::test]
    async fn test_duplicate_rejection() {
        let mempool = Mempool::new(MempoolConfig::default());
        let sender = KeyPair::generate();
        let tx = test_tx(&sender, 1000, 100);

        mempool.add(tx.clone(), 1000).await.unwrap();
        let result = mempool.add(tx, 1001).await;

        assert!(matches!(result, Err(MempoolError::AlreadyExists)));
    }

    #[tokio::test]
    async fn test_batch_is_arrival_ordered() {
        let mempool = Mempool::new(MempoolConfig::default());
        let sender = KeyPair::generate();

        // Insert out of timestamp order
        mempool.add(test_tx(&sender, 3000, 30), 0).await.unwrap();
        mempool.add(test_tx(&sender, 1000, 10), 0).await.unwrap();
        mempool.add(test_tx(&sender, 2000, 20), 0).await.unwrap();

        let batch = mempool.take_batch(10, usize::MAX).await;
        let timestamps: Vec<u64> = batch.iter().map(|tx| tx.timestamp).collect();
        assert_eq!(timestamps, vec![1000, 2000, 3000]);
    }

    #[tokio::test]
    async fn test_batch_respects_limits() {
        let mempool = Mempool::new(MempoolConfig::default());
        let sender = KeyPair::generate();

        for i in 0..5 {
            mempool.add(test_tx(&sender, 1000 + i, 10), 0).await.unwrap();
        }

        let batch = mempool.take_batch(3, usize::MAX).await;
        assert_eq!(batch.len(), 3);

        // A byte budget smaller than two transactions yields exactly one
        let one = mempool.take_batch(10, 1).await;
        assert_eq!(one.len(), 1);
    }

    #[tokio::test]
    async fn test_sender_limit() {
        let config = MempoolConfig {
            max_per_sender: 2,
            ..Default::default()
        };
        let mempool = Mempool::new(config);
        let sender = KeyPair::generate();

        mempool.add(test_tx(&sender, 1000, 1), 0).await.unwrap();
        mempool.add(test_tx(&sender, 1001, 1), 0).await.unwrap();
        let result = mempool.add(test_tx(&sender, 1002, 1), 0).await;

        assert!(matches!(result, Err(MempoolError::SenderLimitReached)));
    }

    #[tokio::test]
    async fn test_remove_committed() {
        let mempool = Mempool::new(MempoolConfig::default());
        let sender = KeyPair::generate();
        let tx = test_tx(&sender, 1000, 100);
        let id = tx.id().unwrap();

        mempool.add(tx, 0).await.unwrap();
        mempool.remove_committed(&[id]).await;

        assert!(!mempool.contains(&id).await);
        assert_eq!(mempool.size().await, 0);
        assert!(mempool.take_batch(10, usize::MAX).await.is_empty());
    }

    #[tokio::test]
    async fn test_expiry() {
        let config = MempoolConfig {
            expiry_ms: 100,
            ..Default::default()
        };
        let mempool = Mempool::new(config);
        let sender = KeyPair::generate();

        mempool.add(test_tx(&sender, 1000, 1), 1000).await.unwrap();
        mempool.add(test_tx(&sender, 2000, 2), 2000).await.unwrap();

        mempool.remove_expired(2050).await;
        assert_eq!(mempool.size().await, 1);
    }
}
