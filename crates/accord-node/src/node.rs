use std::sync::Arc;
use std::time::Duration;

use accord_consensus::{EngineContext, PeerEndpoint, PocEngine};
use accord_core::{KeyPair, NodeId, PublicKey, SecretKey};
use accord_mempool::{Mempool, MempoolConfig};
use accord_registry::{
    AccountableNodeRegistry, CollaborationLists, RegistryConfig, SlashingDocket, ValidatorRecord,
    ValidatorRegistry, ValidatorStatus,
};
use accord_state::FileStorage;
use accord_sync::{
    BlockEnvelope, BlockSynchronizer, BlockTransport, InMemoryTransport, SyncConfig,
};
use anyhow::Result;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::NodeConfig;
use crate::http;

/// The Accord node: wires storage, registries, transport, synchronizer,
/// and the consensus engine, then serves the HTTP surface.
pub struct Node {
    config: NodeConfig,
    identity: KeyPair,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Self> {
        let identity = match &config.validator_key {
            Some(key_hex) => {
                let secret = SecretKey::from_hex(key_hex)?;
                let public = secret.public_key();
                KeyPair { secret, public }
            }
            // Observer nodes run with an ephemeral identity
            None => KeyPair::generate(),
        };

        Ok(Node { config, identity })
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting Accord node as {}", self.identity.public);

        let storage_path = self.config.data_dir.join("chain.bin");
        let storage = Arc::new(RwLock::new(FileStorage::new(storage_path)?));

        let transport: Arc<InMemoryTransport> = Arc::new(InMemoryTransport::new());
        transport.initialize()?;

        let synchronizer = Arc::new(BlockSynchronizer::new(
            Arc::clone(&storage),
            Arc::clone(&transport) as Arc<dyn BlockTransport>,
            SyncConfig {
                finality_depth: self.config.engine.finality_depth,
                ..Default::default()
            },
        ));

        // Restart recovery: unwind partial applies, then catch up. A corrupt
        // journal is fatal and requires operator intervention.
        let report = match synchronizer.recover(transport.as_ref()).await {
            Ok(report) => report,
            Err(err) => {
                error!("Recovery failed, refusing to start: {}", err);
                return Err(err.into());
            }
        };
        if report.rolled_back > 0 || report.applied > 0 {
            info!(
                "Recovered: {} rolled back, {} applied",
                report.rolled_back, report.applied
            );
        }

        // Initialize genesis if the chain is empty
        let genesis = self.config.to_genesis_config()?;
        if synchronizer.tip().await?.is_none() {
            info!("Initializing genesis state");
            synchronizer
                .apply_block(&BlockEnvelope {
                    block: genesis.create_genesis_block(),
                    block_count: 0,
                    producer: NodeId::new("genesis"),
                    certificate: None,
                })
                .await?;
        }

        // Registries: persisted state first, then genesis validators
        let mut validators = {
            let guard = storage.read().await;
            ValidatorRegistry::load(&*guard)?
        };
        for validator in &genesis.validators {
            if validators.get(validator).is_none() {
                validators.register(ValidatorRecord::new(*validator, 0, genesis.timestamp))?;
                validators.transition(validator, ValidatorStatus::Active)?;
            }
        }
        {
            let mut guard = storage.write().await;
            validators.persist(&mut *guard)?;
        }

        let registry_config = RegistryConfig {
            signature_threshold_m: self.config.admission.signature_threshold_m,
            authorized_signers: self.config.authorized_signers()?,
            deposit_multiplier: self.config.engine.deposit_multiplier,
            ..Default::default()
        };
        let (acnodes, lists, docket) = {
            let guard = storage.read().await;
            (
                AccountableNodeRegistry::load(&*guard, registry_config)?,
                CollaborationLists::load(&*guard)?,
                SlashingDocket::load(&*guard)?,
            )
        };

        let peers: Vec<PeerEndpoint> = self
            .config
            .peers
            .iter()
            .map(|peer| {
                let pubkey = PublicKey::from_hex(&peer.pubkey)?;
                Ok(PeerEndpoint::new(pubkey, peer.address.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let ctx = EngineContext {
            genesis_time: genesis.timestamp,
            mempool: Arc::new(Mempool::new(MempoolConfig::default())),
            synchronizer: Arc::clone(&synchronizer),
            storage: Arc::clone(&storage),
            validators: Arc::new(RwLock::new(validators)),
            acnodes: Arc::new(RwLock::new(acnodes)),
            lists: Arc::new(RwLock::new(lists)),
            docket: Arc::new(RwLock::new(docket)),
        };

        let engine = PocEngine::new(
            self.config.engine.clone(),
            self.identity.clone(),
            NodeId::new(self.config.producer_id.clone()),
            peers,
            ctx,
        )?;

        // Transport consumer: peer blocks apply independently of proposal
        // activity; a failing block is retried alone, never the stream.
        let from = synchronizer
            .tip()
            .await?
            .map(|tip| tip.block_count + 1)
            .unwrap_or(0);
        let mut rx = transport.start_consuming(from)?;
        let consumer_sync = Arc::clone(&synchronizer);
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let mut backoff = Duration::from_millis(100);
                for attempt in 0..3u32 {
                    match consumer_sync.apply_block(&envelope).await {
                        Ok(_) => break,
                        Err(err) if attempt < 2 => {
                            warn!(
                                "Apply of block {} failed (attempt {}): {}",
                                envelope.block_count,
                                attempt + 1,
                                err
                            );
                            tokio::time::sleep(backoff).await;
                            backoff *= 2;
                        }
                        Err(err) => {
                            error!("Giving up on block {}: {}", envelope.block_count, err);
                        }
                    }
                }
            }
        });

        let ticker = Arc::clone(&engine).spawn_slot_ticker();

        let router = http::router(Arc::clone(&engine));
        info!("HTTP listening on {}", self.config.http_addr);
        let listener = tokio::net::TcpListener::bind(self.config.http_addr).await?;

        if let Err(err) = axum::serve(listener, router).await {
            error!("HTTP server error: {}", err);
        }

        ticker.abort();
        transport.stop_consuming();

        Ok(())
    }
}
