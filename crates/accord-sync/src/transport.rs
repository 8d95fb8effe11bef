use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use accord_core::{Block, CommitCertificate, NodeId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::SyncError;

/// Upper bound on blocks returned by one peer inventory request
pub const MAX_INVENTORY_PER_REQUEST: usize = 64;

/// A block in flight on the transport, with its position and producer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEnvelope {
    pub block: Block,
    pub block_count: u64,
    pub producer: NodeId,
    /// Present for committed blocks; archived on apply
    pub certificate: Option<CommitCertificate>,
}

/// Durable block propagation between nodes. Implementations own delivery,
/// ordering, and deduplication guarantees; the synchronizer owns recovery,
/// undo bookkeeping, and published markers.
///
/// Delivery is at-least-once: consumers must tolerate redelivery.
pub trait BlockTransport: Send + Sync {
    /// Connect and set up streams/topics. Called once during bootstrap.
    fn initialize(&self) -> Result<(), SyncError>;

    /// Publish a block. Returns only after durable storage is confirmed;
    /// errors are retryable at the caller.
    fn publish_block(&self, envelope: BlockEnvelope) -> Result<(), SyncError>;

    /// Begin consuming blocks at `from_block_count`. Returns the delivery
    /// channel; a failed apply is retried per block by the consumer rather
    /// than poisoning the stream.
    fn start_consuming(
        &self,
        from_block_count: u64,
    ) -> Result<mpsc::UnboundedReceiver<BlockEnvelope>, SyncError>;

    /// Stop consuming blocks (graceful shutdown)
    fn stop_consuming(&self);

    /// Whether the transport is currently usable. Strict mode halts block
    /// production while this is false.
    fn is_healthy(&self) -> bool;
}

/// Source of historical blocks for restart recovery. Responses are bounded
/// by `MAX_INVENTORY_PER_REQUEST` per call.
pub trait PeerBlockSource: Send + Sync {
    fn fetch_blocks(
        &self,
        from_block_count: u64,
        max: usize,
    ) -> Result<Vec<BlockEnvelope>, SyncError>;
}

/// In-process transport backed by a replay log. Used by tests and
/// single-node deployments; publish is durable by construction.
pub struct InMemoryTransport {
    log: Mutex<Vec<BlockEnvelope>>,
    subscriber: Mutex<Option<mpsc::UnboundedSender<BlockEnvelope>>>,
    healthy: AtomicBool,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        InMemoryTransport {
            log: Mutex::new(Vec::new()),
            subscriber: Mutex::new(None),
            healthy: AtomicBool::new(true),
        }
    }

    /// Simulate an outage
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of published envelopes
    pub fn published_count(&self) -> usize {
        self.log.lock().expect("transport log lock").len()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockTransport for InMemoryTransport {
    fn initialize(&self) -> Result<(), SyncError> {
        Ok(())
    }

    fn publish_block(&self, envelope: BlockEnvelope) -> Result<(), SyncError> {
        if !self.is_healthy() {
            return Err(SyncError::TransportUnavailable(
                "in-memory transport marked unhealthy".to_string(),
            ));
        }

        let mut log = self.log.lock().expect("transport log lock");
        log.push(envelope.clone());
        debug!(
            "Published block {} to in-memory transport",
            envelope.block_count
        );

        if let Some(tx) = self.subscriber.lock().expect("subscriber lock").as_ref() {
            // A dropped receiver just means the consumer stopped
            let _ = tx.send(envelope);
        }

        Ok(())
    }

    fn start_consuming(
        &self,
        from_block_count: u64,
    ) -> Result<mpsc::UnboundedReceiver<BlockEnvelope>, SyncError> {
        let mut subscriber = self.subscriber.lock().expect("subscriber lock");
        if subscriber.is_some() {
            return Err(SyncError::ConsumerActive);
        }

        let (tx, rx) = mpsc::unbounded_channel();

        // Replay history at and above the requested count before going live
        let log = self.log.lock().expect("transport log lock");
        for envelope in log.iter().filter(|e| e.block_count >= from_block_count) {
            let _ = tx.send(envelope.clone());
        }

        *subscriber = Some(tx);
        Ok(rx)
    }

    fn stop_consuming(&self) {
        self.subscriber.lock().expect("subscriber lock").take();
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

impl PeerBlockSource for InMemoryTransport {
    fn fetch_blocks(
        &self,
        from_block_count: u64,
        max: usize,
    ) -> Result<Vec<BlockEnvelope>, SyncError> {
        let log = self.log.lock().expect("transport log lock");
        let mut blocks: Vec<BlockEnvelope> = log
            .iter()
            .filter(|e| e.block_count >= from_block_count)
            .cloned()
            .collect();
        blocks.sort_by_key(|e| e.block_count);
        blocks.truncate(max.min(MAX_INVENTORY_PER_REQUEST));
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::{GenesisConfig, KeyPair};

    fn envelope(block_count: u64) -> BlockEnvelope {
        let config = GenesisConfig {
            chain_id: 1,
            timestamp: 0,
            validators: vec![KeyPair::generate().public],
        };
        BlockEnvelope {
            block: config.create_genesis_block(),
            block_count,
            producer: NodeId::new("test"),
            certificate: None,
        }
    }

    #[tokio::test]
    async fn test_replay_from_count() {
        let transport = InMemoryTransport::new();
        transport.initialize().unwrap();

        for i in 0..5 {
            transport.publish_block(envelope(i)).unwrap();
        }

        let mut rx = transport.start_consuming(3).unwrap();
        assert_eq!(rx.recv().await.unwrap().block_count, 3);
        assert_eq!(rx.recv().await.unwrap().block_count, 4);

        // Live delivery continues after replay
        transport.publish_block(envelope(5)).unwrap();
        assert_eq!(rx.recv().await.unwrap().block_count, 5);
    }

    #[tokio::test]
    async fn test_single_consumer() {
        let transport = InMemoryTransport::new();
        let _rx = transport.start_consuming(0).unwrap();
        assert!(matches!(
            transport.start_consuming(0),
            Err(SyncError::ConsumerActive)
        ));

        transport.stop_consuming();
        assert!(transport.start_consuming(0).is_ok());
    }

    #[test]
    fn test_unhealthy_publish_fails() {
        let transport = InMemoryTransport::new();
        transport.set_healthy(false);
        assert!(!transport.is_healthy());
        assert!(matches!(
            transport.publish_block(envelope(0)),
            Err(SyncError::TransportUnavailable(_))
        ));
    }

    #[test]
    fn test_fetch_blocks_bounded() {
        let transport = InMemoryTransport::new();
        for i in 0..10 {
            transport.publish_block(envelope(i)).unwrap();
        }

        let blocks = transport.fetch_blocks(2, 3).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].block_count, 2);
        assert_eq!(blocks[2].block_count, 4);
    }
}
