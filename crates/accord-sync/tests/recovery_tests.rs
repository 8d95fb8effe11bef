//! Restart recovery over file-backed storage: partial applies unwind,
//! committed chains survive reopen, replay stays idempotent.

use std::sync::Arc;

use accord_core::{
    merkle_root, Block, BlockHeader, GenesisConfig, Hash, KeyPair, NodeId, Transaction,
};
use accord_state::{FileStorage, Storage, StoreKey, WriteOp};
use accord_sync::{
    ApplyOutcome, BlockEnvelope, BlockSynchronizer, BlockTransport, InMemoryTransport, SyncConfig,
};
use tokio::sync::RwLock;

fn genesis_envelope() -> BlockEnvelope {
    let config = GenesisConfig {
        chain_id: 1,
        timestamp: 0,
        validators: vec![],
    };
    BlockEnvelope {
        block: config.create_genesis_block(),
        block_count: 0,
        producer: NodeId::new("genesis"),
        certificate: None,
    }
}

fn child_envelope(parent: &BlockEnvelope, timestamp: u64) -> BlockEnvelope {
    let sender = KeyPair::generate();
    let tx = Transaction::new_signed(
        1,
        sender.public,
        KeyPair::generate().public,
        250,
        1,
        timestamp,
        &sender.secret,
    )
    .unwrap();

    let header = BlockHeader {
        chain_id: 1,
        height: parent.block.header.height + 1,
        prev_hash: parent.block.hash().unwrap(),
        timestamp,
        tx_root: merkle_root(&[tx.id().unwrap()]),
        proposer: sender.public,
        producer: NodeId::new("acme"),
    };

    BlockEnvelope {
        block: Block::new(header, vec![tx]),
        block_count: parent.block_count + 1,
        producer: NodeId::new("acme"),
        certificate: None,
    }
}

fn open_sync(path: &std::path::Path) -> BlockSynchronizer<FileStorage> {
    let storage = Arc::new(RwLock::new(FileStorage::new(path).unwrap()));
    BlockSynchronizer::new(
        storage,
        Arc::new(InMemoryTransport::new()),
        SyncConfig {
            finality_depth: 8,
            max_publish_retries: 2,
            retry_backoff_ms: 1,
        },
    )
}

#[tokio::test]
async fn chain_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain.bin");

    let genesis = genesis_envelope();
    let block1 = child_envelope(&genesis, 1000);
    let tip_hash = block1.block.hash().unwrap();

    {
        let sync = open_sync(&path);
        sync.apply_block(&genesis).await.unwrap();
        sync.apply_block(&block1).await.unwrap();
    }

    let sync = open_sync(&path);
    let tip = sync.tip().await.unwrap().unwrap();
    assert_eq!(tip.block_count, 1);
    assert_eq!(tip.hash, tip_hash);

    // Redelivery after restart is still a no-op
    assert_eq!(
        sync.apply_block(&block1).await.unwrap(),
        ApplyOutcome::AlreadyApplied
    );
}

#[tokio::test]
async fn recovery_unwinds_partial_apply_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain.bin");

    let genesis = genesis_envelope();
    let block1 = child_envelope(&genesis, 1000);
    let hash1 = block1.block.hash().unwrap();

    {
        let sync = open_sync(&path);
        sync.apply_block(&genesis).await.unwrap();
        sync.apply_block(&block1).await.unwrap();

        // Simulate a crash between the journal batch and the marker write
        let storage = Arc::new(RwLock::new(FileStorage::new(&path).unwrap()));
        let mut guard = storage.write().await;
        guard
            .write_batch(vec![WriteOp::del(StoreKey::published_marker(&hash1))])
            .unwrap();
    }

    let sync = open_sync(&path);
    let peers = InMemoryTransport::new();
    let report = sync.recover(&peers).await.unwrap();

    assert_eq!(report.rolled_back, 1);
    let tip = sync.tip().await.unwrap().unwrap();
    assert_eq!(tip.block_count, 0);
    assert_eq!(tip.hash, genesis.block.hash().unwrap());
}

#[tokio::test]
async fn recovery_catches_up_then_accepts_live_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain.bin");

    // A peer already carries three blocks
    let peers = InMemoryTransport::new();
    let genesis = genesis_envelope();
    let block1 = child_envelope(&genesis, 1000);
    let block2 = child_envelope(&block1, 2000);
    for envelope in [&genesis, &block1, &block2] {
        peers.publish_block((*envelope).clone()).unwrap();
    }

    let sync = open_sync(&path);
    let report = sync.recover(&peers).await.unwrap();
    assert_eq!(report.applied, 3);

    // Live delivery continues on top of the recovered tip
    let block3 = child_envelope(&block2, 3000);
    assert_eq!(
        sync.apply_block(&block3).await.unwrap(),
        ApplyOutcome::Applied
    );
    assert_eq!(sync.tip().await.unwrap().unwrap().block_count, 3);
}

#[tokio::test]
async fn undo_restores_file_backed_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain.bin");

    let genesis = genesis_envelope();
    let block1 = child_envelope(&genesis, 1000);
    let hash1 = block1.block.hash().unwrap();

    let sync = open_sync(&path);
    sync.apply_block(&genesis).await.unwrap();

    let before = {
        let storage = FileStorage::new(&path).unwrap();
        storage.keys_with_prefix(b"")
    };

    sync.apply_block(&block1).await.unwrap();
    sync.rollback_block(1, &hash1).await.unwrap();

    // Rollback also reaches the snapshot on disk
    let after = {
        let storage = FileStorage::new(&path).unwrap();
        storage.keys_with_prefix(b"")
    };
    assert_eq!(before, after);
    assert_eq!(sync.tip().await.unwrap().unwrap().block_count, 0);
}
