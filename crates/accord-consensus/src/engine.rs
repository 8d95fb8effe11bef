use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use accord_core::{Approval, Block, BlockHeader, Hash, KeyPair, NodeId, PublicKey, Transaction};
use accord_mempool::Mempool;
use accord_registry::{
    AcNodeStatus, AccountableNodeRegistry, BlacklistEntry, CaseResolution, CollaborationLists,
    Party, RegistryError, ResolutionAction, SlashingDocket, ValidatorRegistry, ValidatorStatus,
};
use accord_state::Storage;
use accord_sync::{ApplyOutcome, BlockEnvelope, BlockSynchronizer};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::approvals::ApprovalTracker;
use crate::config::{constants, BlockMode, EngineConfig};
use crate::error::ConsensusError;
use crate::fraud::FraudMonitor;
use crate::messages::{
    within_drift, ApprovalMsg, CommitMsg, CommitRequest, ProposalMsg, ProposalResponse,
};
use crate::scheduler::{epoch_seed, quorum_size, EpochInfo, EpochSchedule, EpochStats};
use crate::status::{EnginePhase, EngineStatus, NodeRole, ShadowRole, TipInfo};

/// A fellow validator reachable over the peer protocol
#[derive(Debug, Clone)]
pub struct PeerEndpoint {
    pub validator: PublicKey,
    pub address: String,
}

impl PeerEndpoint {
    pub fn new(validator: PublicKey, address: String) -> Self {
        PeerEndpoint { validator, address }
    }
}

/// Shared collaborators the engine drives
pub struct EngineContext<S: Storage> {
    pub genesis_time: u64,
    pub mempool: Arc<Mempool>,
    pub synchronizer: Arc<BlockSynchronizer<S>>,
    pub storage: Arc<RwLock<S>>,
    pub validators: Arc<RwLock<ValidatorRegistry>>,
    pub acnodes: Arc<RwLock<AccountableNodeRegistry>>,
    pub lists: Arc<RwLock<CollaborationLists>>,
    pub docket: Arc<RwLock<SlashingDocket>>,
}

/// One in-flight consensus round on the coordinator
struct RoundState {
    epoch_id: u64,
    slot: u64,
    block: Block,
    block_hash: Hash,
    tracker: ApprovalTracker,
}

struct EngineCore {
    phase: EnginePhase,
    round: Option<RoundState>,
    schedule: Option<EpochSchedule>,
    stats: EpochStats,
    blocks_proposed: u64,
    blocks_validated: u64,
    last_block_time: Option<u64>,
}

/// The Proof of Collaboration engine: one logical instance per chain.
///
/// Concurrency discipline: the protocol state machine lives behind `core`;
/// chain mutation is serialized by the synchronizer's storage write lock.
/// Proposal drafting, approval collection, and transport I/O overlap freely
/// with read-only status queries.
pub struct PocEngine<S: Storage + 'static> {
    /// Back-reference for timer tasks spawned from `&self` methods
    self_ref: std::sync::Weak<PocEngine<S>>,
    config: EngineConfig,
    identity: KeyPair,
    /// Accountable node this validator produces blocks under
    producer_id: NodeId,
    genesis_time: u64,
    mempool: Arc<Mempool>,
    synchronizer: Arc<BlockSynchronizer<S>>,
    storage: Arc<RwLock<S>>,
    validators: Arc<RwLock<ValidatorRegistry>>,
    acnodes: Arc<RwLock<AccountableNodeRegistry>>,
    lists: Arc<RwLock<CollaborationLists>>,
    docket: Arc<RwLock<SlashingDocket>>,
    monitor: RwLock<FraudMonitor>,
    core: RwLock<EngineCore>,
    peers: Vec<PeerEndpoint>,
    client: reqwest::Client,
}

impl<S: Storage + 'static> PocEngine<S> {
    pub fn new(
        config: EngineConfig,
        identity: KeyPair,
        producer_id: NodeId,
        peers: Vec<PeerEndpoint>,
        ctx: EngineContext<S>,
    ) -> Result<Arc<Self>, ConsensusError> {
        config.validate()?;

        Ok(Arc::new_cyclic(|weak| PocEngine {
            self_ref: weak.clone(),
            config,
            identity,
            producer_id,
            genesis_time: ctx.genesis_time,
            mempool: ctx.mempool,
            synchronizer: ctx.synchronizer,
            storage: ctx.storage,
            validators: ctx.validators,
            acnodes: ctx.acnodes,
            lists: ctx.lists,
            docket: ctx.docket,
            monitor: RwLock::new(FraudMonitor::new()),
            core: RwLock::new(EngineCore {
                phase: EnginePhase::Idle,
                round: None,
                schedule: None,
                stats: EpochStats::default(),
                blocks_proposed: 0,
                blocks_validated: 0,
                last_block_time: None,
            }),
            peers,
            client: reqwest::Client::new(),
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn identity(&self) -> PublicKey {
        self.identity.public
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// (epoch, global slot) for a wall-clock instant
    pub fn slot_at(&self, now: u64) -> (u64, u64) {
        let slot = now.saturating_sub(self.genesis_time) / self.config.slot_ms;
        (slot / self.config.epoch_length_slots, slot)
    }

    pub async fn is_stopped(&self) -> bool {
        self.core.read().await.phase == EnginePhase::Stopped
    }

    /// Fatal halt. Terminal until restart; every handler refuses afterwards.
    pub async fn stop(&self, reason: &str) {
        error!("Engine stopping: {}", reason);
        let mut core = self.core.write().await;
        core.phase = EnginePhase::Stopped;
        core.round = None;
    }

    async fn ensure_running(&self) -> Result<(), ConsensusError> {
        if self.is_stopped().await {
            return Err(ConsensusError::EngineStopped(
                "engine requires operator intervention".to_string(),
            ));
        }
        Ok(())
    }

    /// The epoch schedule, deriving and caching it at epoch entry. The seed
    /// comes from the finalized block (`finality_depth` behind the tip), so
    /// synced honest nodes recompute the identical schedule locally.
    pub async fn schedule_for(&self, epoch_id: u64) -> Result<EpochSchedule, ConsensusError> {
        {
            let core = self.core.read().await;
            if let Some(schedule) = &core.schedule {
                if schedule.epoch_id == epoch_id {
                    return Ok(schedule.clone());
                }
            }
        }

        let finalized_hash = match self.synchronizer.tip().await? {
            Some(tip) => {
                let finalized_count = tip.block_count.saturating_sub(self.config.finality_depth);
                match self.synchronizer.block_by_count(finalized_count).await? {
                    Some(block) => block.hash()?,
                    None => tip.hash,
                }
            }
            None => Hash::ZERO,
        };

        let pool = self.validators.read().await.eligible_pool();
        let seed = epoch_seed(finalized_hash, epoch_id);
        let schedule = EpochSchedule::derive(
            seed,
            &pool,
            epoch_id,
            self.config.epoch_length_slots,
            self.config.active_set_size,
        );

        let mut core = self.core.write().await;
        if core.schedule.as_ref().map(|s| s.epoch_id) != Some(epoch_id) {
            info!(
                "Entering epoch {} (active set {} of {})",
                epoch_id,
                schedule.active.len(),
                schedule.pool.len()
            );
            core.schedule = Some(schedule.clone());
            core.stats = EpochStats::default();
        }
        Ok(schedule)
    }

    /// Snapshot of the current epoch, if one has started
    pub async fn epoch_info(&self) -> Option<EpochInfo> {
        let (_, slot) = self.slot_at(Self::now_ms());
        let core = self.core.read().await;
        core.schedule.as_ref().map(|schedule| {
            EpochInfo::from_schedule(
                schedule,
                slot,
                self.genesis_time,
                self.config.slot_ms,
                core.stats,
            )
        })
    }

    /// Accept a transaction into the pool. In INSTANT mode an arrival while
    /// idle opens a round immediately.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<Hash, ConsensusError> {
        self.ensure_running().await?;

        if tx.chain_id != self.config.chain_id {
            return Err(ConsensusError::InvalidBlock(format!(
                "transaction for chain {} on chain {}",
                tx.chain_id, self.config.chain_id
            )));
        }
        tx.verify_signature()?;

        let now = Self::now_ms();
        let id = self.mempool.add(tx, now).await?;
        debug!("Accepted transaction {}", id);

        if self.config.block_mode == BlockMode::Instant {
            self.try_open_round(now).await?;
        }

        Ok(id)
    }

    /// Periodic driver: expiry sweep always, slot-boundary proposing in
    /// EPOCH mode.
    pub fn spawn_slot_ticker(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(self.config.slot_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if self.is_stopped().await {
                    break;
                }
                let now = Self::now_ms();
                self.mempool.remove_expired(now).await;
                if self.config.block_mode == BlockMode::Epoch {
                    if let Err(err) = self.try_open_round(now).await {
                        warn!("Slot tick: {}", err);
                    }
                }
            }
        })
    }

    /// Open a round if this node coordinates the current slot and the pool
    /// has work. Non-coordinators arm their shadow timers here.
    pub async fn try_open_round(&self, now: u64) -> Result<(), ConsensusError> {
        self.ensure_running().await?;

        {
            let core = self.core.read().await;
            if core.phase != EnginePhase::Idle {
                return Ok(());
            }
        }

        let (epoch_id, slot) = self.slot_at(now);
        let schedule = self.schedule_for(epoch_id).await?;

        let me = self.identity.public;
        let forced = self.config.dev.force_coordinator == Some(me);
        let is_coordinator = forced || schedule.is_slot_coordinator(&me, slot);

        if !is_coordinator {
            if self.config.shadow_validators_enabled {
                if let Some(rank) = schedule.shadow_rank(&me, slot) {
                    self.spawn_shadow_timer(epoch_id, slot, rank);
                }
            }
            return Ok(());
        }

        if self.config.strict_transport && !self.synchronizer.transport().is_healthy() {
            warn!("Transport unhealthy in strict mode; proposing halted");
            return Ok(());
        }

        self.open_round(epoch_id, slot, &schedule, now).await
    }

    async fn open_round(
        &self,
        epoch_id: u64,
        slot: u64,
        schedule: &EpochSchedule,
        now: u64,
    ) -> Result<(), ConsensusError> {
        let txs = self
            .mempool
            .take_batch(self.config.max_block_txs, self.config.max_block_bytes)
            .await;
        if txs.is_empty() {
            // Empty slots produce no block
            return Ok(());
        }

        let tip = self
            .synchronizer
            .tip()
            .await?
            .ok_or(ConsensusError::ChainNotInitialized)?;

        let total_value: u64 = txs.iter().fold(0u64, |acc, tx| acc.saturating_add(tx.amount));

        // Eligibility is re-derived at proposal time, never cached
        if !self.config.dev.skip_accountability_check {
            let checked_value = if self.config.dev.skip_deposit_check {
                0
            } else {
                total_value
            };
            let acnodes = self.acnodes.read().await;
            acnodes
                .check_producer_eligibility(&self.producer_id, checked_value)
                .map_err(|err| {
                    warn!("Not eligible to produce: {}", err);
                    ConsensusError::ProducerIneligible(err.to_string())
                })?;
        }

        {
            let mut core = self.core.write().await;
            if core.phase != EnginePhase::Idle {
                return Ok(());
            }
            core.phase = EnginePhase::Proposing;
        }

        let result = self
            .draft_round(epoch_id, slot, schedule, now, txs, tip)
            .await;
        if result.is_err() {
            // A failed draft aborts the round instead of wedging the phase
            let mut core = self.core.write().await;
            if core.phase == EnginePhase::Proposing {
                core.round = None;
                core.phase = EnginePhase::Idle;
            }
        }
        result
    }

    async fn draft_round(
        &self,
        epoch_id: u64,
        slot: u64,
        schedule: &EpochSchedule,
        now: u64,
        txs: Vec<Transaction>,
        tip: accord_sync::ChainTip,
    ) -> Result<(), ConsensusError> {
        let tx_ids: Result<Vec<Hash>, _> = txs.iter().map(|tx| tx.id()).collect();
        let header = BlockHeader {
            chain_id: self.config.chain_id,
            height: tip.block_count + 1,
            prev_hash: tip.hash,
            timestamp: now,
            tx_root: accord_core::merkle_root(&tx_ids?),
            proposer: self.identity.public,
            producer: self.producer_id.clone(),
        };
        let block = Block::new(header, txs);
        let block_hash = block.hash()?;

        let proposal = ProposalMsg::new_signed(
            epoch_id,
            slot,
            block.clone(),
            self.identity.public,
            &self.identity.secret,
            now,
        )?;

        let quorum = quorum_size(self.config.quorum_threshold, schedule.active.len());
        let mut tracker = ApprovalTracker::new(epoch_id, slot, block_hash, &schedule.active, quorum);

        // The coordinator's own approval counts when it sits in the set
        if schedule.contains(&self.identity.public) {
            let own = Approval::sign_for(
                block_hash,
                self.identity.public,
                &self.identity.secret,
                now,
            );
            tracker.add(own)?;
        }

        {
            let mut core = self.core.write().await;
            core.round = Some(RoundState {
                epoch_id,
                slot,
                block: block.clone(),
                block_hash,
                tracker,
            });
            core.phase = EnginePhase::CollectingApprovals;
            core.blocks_proposed += 1;
        }

        self.monitor.write().await.observe_proposal(
            epoch_id,
            slot,
            block_hash,
            self.identity.public,
            now,
        );

        info!(
            "Proposed block {} for epoch {} slot {} ({} txs, value {})",
            block_hash,
            epoch_id,
            slot,
            block.txs.len(),
            block.total_value()
        );

        // The pending wait is cancellable: quorum or a later slot supersedes
        let timeout_ms = match self.config.block_mode {
            BlockMode::Instant => self.config.instant_timeout_ms,
            BlockMode::Epoch => self.config.slot_ms,
        };
        self.spawn_round_timeout(epoch_id, slot, timeout_ms);

        // Single-validator networks reach quorum on their own approval
        self.try_commit(epoch_id, slot).await?;

        self.broadcast_proposal(&proposal).await;

        Ok(())
    }

    /// Validator path: validate a proposal and answer with an approval, or
    /// refuse. Absence of an approval before the window closes counts as
    /// non-approval; there is no explicit reject message.
    pub async fn handle_proposal(
        &self,
        msg: ProposalMsg,
    ) -> Result<Option<ApprovalMsg>, ConsensusError> {
        self.ensure_running().await?;
        let now = Self::now_ms();

        if !within_drift(msg.timestamp, now, self.config.max_clock_drift_ms) {
            debug!("Dropping proposal outside drift window");
            return Err(ConsensusError::ClockDrift {
                message_ts: msg.timestamp,
                now,
            });
        }

        msg.verify_signature()?;

        // The claimed slot must be the one the (drift-checked) send time
        // falls into; eligibility for an arbitrary slot is meaningless.
        let (msg_epoch, msg_slot) = self.slot_at(msg.timestamp);
        if msg.epoch_id != msg_epoch || msg.slot != msg_slot {
            return Err(ConsensusError::InvalidBlock(format!(
                "message claims epoch {} slot {} but was sent in epoch {} slot {}",
                msg.epoch_id, msg.slot, msg_epoch, msg_slot
            )));
        }

        let schedule = self.schedule_for(msg.epoch_id).await?;

        let forced = self.config.dev.force_coordinator == Some(msg.coordinator);
        let is_primary = schedule.is_slot_coordinator(&msg.coordinator, msg.slot);
        let is_shadow = self.config.shadow_validators_enabled
            && schedule.shadow_rank(&msg.coordinator, msg.slot).is_some();
        if !(forced || is_primary || is_shadow) {
            return Err(ConsensusError::UnexpectedCoordinator(
                msg.coordinator.to_hex(),
            ));
        }

        let block = &msg.block;
        let block_hash = block.hash()?;

        let reports = self.monitor.write().await.observe_proposal(
            msg.epoch_id,
            msg.slot,
            block_hash,
            msg.coordinator,
            now,
        );
        self.file_reports(reports).await?;

        if let Some(canonical) = self
            .monitor
            .read()
            .await
            .canonical_for(msg.epoch_id, msg.slot)
        {
            if canonical != block_hash {
                return Err(ConsensusError::InvalidBlock(
                    "conflicting proposal is not canonical".to_string(),
                ));
            }
        }

        if block.header.chain_id != self.config.chain_id {
            return Err(ConsensusError::InvalidBlock("chain id mismatch".to_string()));
        }
        let tip = self
            .synchronizer
            .tip()
            .await?
            .ok_or(ConsensusError::ChainNotInitialized)?;
        if block.header.height != tip.block_count + 1 || block.header.prev_hash != tip.hash {
            return Err(ConsensusError::InvalidBlock(
                "block does not extend the local tip".to_string(),
            ));
        }
        if !block.verify_tx_root()? {
            return Err(ConsensusError::InvalidBlock(
                "transaction root mismatch".to_string(),
            ));
        }

        if let Some(report) = self
            .monitor
            .read()
            .await
            .check_ordering(block, msg.coordinator, now)
        {
            self.file_reports(vec![report]).await?;
            return Err(ConsensusError::InvalidBlock(
                "transactions out of arrival order".to_string(),
            ));
        }

        for tx in &block.txs {
            if tx.verify_signature().is_err() {
                let report = self.monitor.read().await.report_bad_signature(
                    tx.from,
                    "transaction in proposed block",
                    now,
                );
                self.file_reports(vec![report]).await?;
                return Err(ConsensusError::InvalidBlock(
                    "invalid transaction signature".to_string(),
                ));
            }
        }

        // Producer accountability, re-checked against this block's value
        if !self.config.dev.skip_accountability_check {
            let checked_value = if self.config.dev.skip_deposit_check {
                0
            } else {
                block.total_value()
            };
            let eligibility = {
                let acnodes = self.acnodes.read().await;
                acnodes.check_producer_eligibility(&block.header.producer, checked_value)
            };
            if let Err(err) = eligibility {
                if let RegistryError::DepositInsufficient { required, actual } = &err {
                    let report = self.monitor.read().await.report_deposit_violation(
                        block.header.producer.clone(),
                        block_hash,
                        *required,
                        *actual,
                        now,
                    );
                    self.file_reports(vec![report]).await?;
                }
                return Err(ConsensusError::ProducerIneligible(err.to_string()));
            }
        }

        if !schedule.contains(&self.identity.public) {
            debug!("Not in the active set; observing only");
            return Ok(None);
        }

        let approval = Approval::sign_for(
            block_hash,
            self.identity.public,
            &self.identity.secret,
            now,
        );

        {
            let mut core = self.core.write().await;
            core.blocks_validated += 1;
        }
        self.lists
            .write()
            .await
            .record_block_validated(&self.identity.public);

        info!(
            "Approved block {} for epoch {} slot {}",
            block_hash, msg.epoch_id, msg.slot
        );

        Ok(Some(ApprovalMsg {
            epoch_id: msg.epoch_id,
            slot: msg.slot,
            block_hash,
            approval,
        }))
    }

    /// Coordinator path: fold an approval into the open round, committing
    /// when quorum is reached.
    pub async fn handle_approval(
        &self,
        msg: ApprovalMsg,
    ) -> Result<Option<CommitMsg>, ConsensusError> {
        self.ensure_running().await?;
        let now = Self::now_ms();

        if !within_drift(msg.approval.timestamp, now, self.config.max_clock_drift_ms) {
            return Err(ConsensusError::ClockDrift {
                message_ts: msg.approval.timestamp,
                now,
            });
        }

        if let Some(report) =
            self.monitor
                .read()
                .await
                .observe_approval(msg.epoch_id, msg.slot, &msg.approval, now)
        {
            self.file_reports(vec![report]).await?;
        }

        let reached = {
            let mut core = self.core.write().await;
            let Some(round) = core.round.as_mut() else {
                return Err(ConsensusError::NoSuchRound {
                    epoch_id: msg.epoch_id,
                    slot: msg.slot,
                });
            };
            if round.epoch_id != msg.epoch_id
                || round.slot != msg.slot
                || round.block_hash != msg.block_hash
            {
                return Err(ConsensusError::NoSuchRound {
                    epoch_id: msg.epoch_id,
                    slot: msg.slot,
                });
            }
            round.tracker.add(msg.approval)?
        };

        if reached {
            self.try_commit(msg.epoch_id, msg.slot).await
        } else {
            Ok(None)
        }
    }

    /// Apply a peer's commit: verify the approval set against the epoch's
    /// active set and quorum, then persist through the synchronizer.
    pub async fn handle_commit(&self, req: CommitRequest) -> Result<ApplyOutcome, ConsensusError> {
        self.ensure_running().await?;
        let now = Self::now_ms();

        if !within_drift(req.commit.commit_timestamp, now, self.config.max_clock_drift_ms) {
            return Err(ConsensusError::ClockDrift {
                message_ts: req.commit.commit_timestamp,
                now,
            });
        }

        let block_hash = req.block.hash()?;
        if block_hash != req.commit.block_hash {
            return Err(ConsensusError::InvalidBlock(
                "commit references a different block".to_string(),
            ));
        }

        let schedule = self.schedule_for(req.commit.epoch_id).await?;
        let quorum = quorum_size(self.config.quorum_threshold, schedule.active.len());
        let certificate = req.commit.to_certificate();
        certificate.verify(&schedule.active, quorum)?;

        {
            let mut core = self.core.write().await;
            core.phase = EnginePhase::Syncing;
        }

        let envelope = BlockEnvelope {
            block: req.block.clone(),
            block_count: req.block.header.height,
            producer: req.block.header.producer.clone(),
            certificate: Some(certificate),
        };

        let outcome = match self.synchronizer.apply_block(&envelope).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let mut core = self.core.write().await;
                core.phase = EnginePhase::Idle;
                return Err(err.into());
            }
        };

        if outcome == ApplyOutcome::Applied {
            if let Err(err) = self.after_commit(&req.block, now).await {
                self.stop(&format!("post-commit persistence failed: {err}"))
                    .await;
                return Err(err);
            }
        }

        {
            let mut core = self.core.write().await;
            if core
                .round
                .as_ref()
                .map(|r| r.block_hash == block_hash)
                .unwrap_or(false)
            {
                core.round = None;
            }
            if outcome == ApplyOutcome::Applied {
                core.stats.blocks_produced += 1;
                core.stats.total_transactions += req.block.txs.len() as u64;
                core.last_block_time = Some(now);
            }
            core.phase = EnginePhase::Idle;
        }

        Ok(outcome)
    }

    /// Commit the open round if quorum is reached. Publishes through the
    /// synchronizer (durable before return), then republishes the commit to
    /// peers and returns to IDLE via SYNCING.
    async fn try_commit(&self, epoch_id: u64, slot: u64) -> Result<Option<CommitMsg>, ConsensusError> {
        let now = Self::now_ms();

        let (commit, block, active_len) = {
            let mut core = self.core.write().await;
            let Some(round) = core.round.as_ref() else {
                return Ok(None);
            };
            if round.epoch_id != epoch_id
                || round.slot != slot
                || core.phase != EnginePhase::CollectingApprovals
                || !round.tracker.has_quorum()
            {
                return Ok(None);
            }
            let active_len = core
                .schedule
                .as_ref()
                .map(|s| s.active.len())
                .unwrap_or(0);
            let result = (round.tracker.to_commit(now)?, round.block.clone(), active_len);
            core.phase = EnginePhase::Committing;
            result
        };

        info!(
            "Quorum reached for block {} with {} approvals",
            commit.block_hash,
            commit.approvals.len()
        );

        let envelope = BlockEnvelope {
            block: block.clone(),
            block_count: block.header.height,
            producer: block.header.producer.clone(),
            certificate: Some(commit.to_certificate()),
        };

        if let Err(err) = self.synchronizer.publish(envelope).await {
            if self.config.strict_transport {
                self.stop(&format!("transport failure while committing: {err}"))
                    .await;
                return Err(err.into());
            }
            // Durable locally; republication is retried with later blocks
            warn!("Commit republication failed: {}", err);
        }

        {
            let mut core = self.core.write().await;
            core.phase = EnginePhase::Syncing;
        }

        if let Err(err) = self.after_commit(&block, now).await {
            // Registry persistence failing after a durable commit risks a
            // fork on restart; fail fast rather than limp along
            self.stop(&format!("post-commit persistence failed: {err}"))
                .await;
            return Err(err);
        }
        self.broadcast_commit(&commit, &block).await;

        {
            let mut core = self.core.write().await;
            core.round = None;
            core.phase = EnginePhase::Idle;
            core.stats.blocks_produced += 1;
            core.stats.total_transactions += block.txs.len() as u64;
            if active_len > 0 {
                core.stats.participation_rate =
                    commit.approvals.len() as f64 / active_len as f64;
            }
            core.last_block_time = Some(now);
        }

        self.monitor.write().await.forget_before(epoch_id, slot);

        Ok(Some(commit))
    }

    /// Post-commit bookkeeping: pool cleanup, whitelist counters, deposit
    /// tracking, and registry persistence.
    async fn after_commit(&self, block: &Block, _now: u64) -> Result<(), ConsensusError> {
        let tx_ids: Vec<Hash> = block.txs.iter().filter_map(|tx| tx.id().ok()).collect();
        self.mempool.remove_committed(&tx_ids).await;

        {
            let mut lists = self.lists.write().await;
            lists.add_to_whitelist(block.header.proposer, block.header.height);
            lists.record_block_created(&block.header.proposer);
        }

        {
            let mut acnodes = self.acnodes.write().await;
            if let Err(err) =
                acnodes.record_block_value(&block.header.producer, block.total_value())
            {
                debug!("No deposit record to refresh: {}", err);
            }
        }

        let mut storage = self.storage.write().await;
        self.lists.read().await.persist(&mut *storage)?;
        self.acnodes.read().await.persist(&mut *storage)?;
        self.docket.read().await.persist(&mut *storage)?;

        Ok(())
    }

    /// Quorum-failure handling: abandon the round and retry next slot.
    /// Ignored when the round was already superseded or committed.
    pub async fn on_round_timeout(&self, epoch_id: u64, slot: u64) {
        let mut core = self.core.write().await;
        let matches = core
            .round
            .as_ref()
            .map(|r| r.epoch_id == epoch_id && r.slot == slot)
            .unwrap_or(false);
        if matches && core.phase == EnginePhase::CollectingApprovals {
            let have = core
                .round
                .as_ref()
                .map(|r| r.tracker.approval_count())
                .unwrap_or(0);
            warn!(
                "Round for epoch {} slot {} timed out without quorum ({} approvals)",
                epoch_id, slot, have
            );
            core.round = None;
            core.phase = EnginePhase::Idle;
        }
    }

    fn spawn_round_timeout(&self, epoch_id: u64, slot: u64, delay_ms: u64) {
        let Some(engine) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            engine.on_round_timeout(epoch_id, slot).await;
        });
    }

    /// Standby takeover: propose after the rank's delay if the slot is
    /// still silent.
    fn spawn_shadow_timer(&self, epoch_id: u64, slot: u64, rank: ShadowRole) {
        let Some(engine) = self.self_ref.upgrade() else {
            return;
        };
        let delay_ms = match rank {
            ShadowRole::Shadow1 => self.config.shadow_delay_1_ms,
            ShadowRole::Shadow2 => self.config.shadow_delay_2_ms,
        };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;

            if engine.monitor.read().await.has_proposal(epoch_id, slot) {
                return;
            }
            let now = Self::now_ms();
            if engine.slot_at(now) != (epoch_id, slot) {
                return;
            }
            {
                let core = engine.core.read().await;
                if core.phase != EnginePhase::Idle {
                    return;
                }
            }

            info!(
                "{:?} promoting to coordinator for epoch {} slot {}",
                rank, epoch_id, slot
            );
            let schedule = match engine.schedule_for(epoch_id).await {
                Ok(schedule) => schedule,
                Err(err) => {
                    warn!("Shadow promotion failed: {}", err);
                    return;
                }
            };
            if let Err(err) = engine.open_round(epoch_id, slot, &schedule, now).await {
                warn!("Shadow proposal failed: {}", err);
            }
        });
    }

    async fn broadcast_proposal(&self, proposal: &ProposalMsg) {
        for peer in &self.peers {
            if peer.validator == self.identity.public {
                continue;
            }

            let url = format!(
                "{}/{}",
                peer.address.trim_end_matches('/'),
                constants::TOPIC_POC_PROPOSAL
            );
            let response = match self.client.post(&url).json(proposal).send().await {
                Ok(response) => response,
                Err(err) => {
                    warn!("Failed to reach validator {}: {}", peer.validator, err);
                    continue;
                }
            };

            if !response.status().is_success() {
                warn!(
                    "Validator {} refused proposal: {}",
                    peer.validator,
                    response.status()
                );
                continue;
            }

            let body: ProposalResponse = match response.json().await {
                Ok(body) => body,
                Err(err) => {
                    warn!("Invalid proposal response from {}: {}", peer.validator, err);
                    continue;
                }
            };

            if let Some(approval) = body.approval {
                match self.handle_approval(approval).await {
                    Ok(Some(_)) => break, // committed
                    Ok(None) => {}
                    Err(err) => warn!("Approval from {} not counted: {}", peer.validator, err),
                }
            }
        }
    }

    async fn broadcast_commit(&self, commit: &CommitMsg, block: &Block) {
        if self.peers.is_empty() {
            return;
        }

        let request = CommitRequest {
            commit: commit.clone(),
            block: block.clone(),
        };

        for peer in &self.peers {
            if peer.validator == self.identity.public {
                continue;
            }

            let url = format!(
                "{}/{}",
                peer.address.trim_end_matches('/'),
                constants::TOPIC_POC_COMMIT
            );
            if let Err(err) = self.client.post(&url).json(&request).send().await {
                warn!("Failed to deliver commit to {}: {}", peer.validator, err);
            }
        }
    }

    async fn file_reports(
        &self,
        reports: Vec<accord_registry::FraudReport>,
    ) -> Result<(), ConsensusError> {
        if reports.is_empty() {
            return Ok(());
        }

        let reporter = Party::Validator(self.identity.public);
        let mut docket = self.docket.write().await;
        for report in reports {
            let accused = report.perpetrator.clone();
            let case_id = docket.open_case(report, reporter.clone())?;
            if let Party::Node(node_id) = accused {
                let mut acnodes = self.acnodes.write().await;
                if let Err(err) = acnodes.attach_case(&node_id, &case_id) {
                    debug!("Could not attach case to {}: {}", node_id, err);
                }
            }
        }
        Ok(())
    }

    /// Apply a governance slashing resolution: resolve the case, transition
    /// the accused, route the confiscated deposit, blacklist on slash. The
    /// monitor proposes; this is the only path that actually slashes.
    pub async fn apply_slashing_resolution(
        &self,
        case_id: &str,
        resolution: CaseResolution,
    ) -> Result<(), ConsensusError> {
        let now = Self::now_ms();
        let (action, accused, reason) = {
            let mut docket = self.docket.write().await;
            let case = docket.resolve(case_id, resolution)?;
            (case.resolution.as_ref().map(|r| r.action), case.accused.clone(), format!("{:?}", case.kind))
        };

        if action == Some(ResolutionAction::Slash) {
            let confiscated = match &accused {
                Party::Node(node_id) => {
                    let mut acnodes = self.acnodes.write().await;
                    acnodes.slash(node_id, now)?
                }
                Party::Validator(validator) => {
                    let mut validators = self.validators.write().await;
                    validators.transition(validator, ValidatorStatus::Slashed)?;
                    validators.get(validator).map(|r| r.deposit).unwrap_or(0)
                }
            };

            let public_key = match &accused {
                Party::Validator(pk) => *pk,
                Party::Node(node_id) => {
                    let acnodes = self.acnodes.read().await;
                    acnodes
                        .get(node_id)
                        .map(|r| r.public_key)
                        .unwrap_or_default()
                }
            };

            self.lists.write().await.add_to_blacklist(BlacklistEntry {
                public_key,
                reason,
                evidence: case_id.to_string(),
                added_at: now,
                confiscated_deposit: confiscated,
            });
        }

        let mut storage = self.storage.write().await;
        self.docket.read().await.persist(&mut *storage)?;
        self.acnodes.read().await.persist(&mut *storage)?;
        self.validators.read().await.persist(&mut *storage)?;
        self.lists.read().await.persist(&mut *storage)?;

        Ok(())
    }

    /// The open round, if any: (epoch, slot, block hash)
    pub async fn open_round_info(&self) -> Option<(u64, u64, Hash)> {
        let core = self.core.read().await;
        core.round
            .as_ref()
            .map(|r| (r.epoch_id, r.slot, r.block_hash))
    }

    /// Read-only snapshot, recomputed on demand
    pub async fn status(&self) -> EngineStatus {
        let now = Self::now_ms();
        let (epoch, slot) = self.slot_at(now);
        let me = self.identity.public;

        let tip = self
            .synchronizer
            .tip()
            .await
            .ok()
            .flatten()
            .map(|t| TipInfo {
                block_count: t.block_count,
                hash: t.hash.to_hex(),
            });

        let core = self.core.read().await;
        let (role, shadow_role, active_set_size, total_pool_size) = match &core.schedule {
            Some(schedule) if schedule.epoch_id == epoch => {
                let role = if schedule.is_slot_coordinator(&me, slot) {
                    NodeRole::Coordinator
                } else if schedule.contains(&me) {
                    NodeRole::Validator
                } else {
                    NodeRole::Observer
                };
                (
                    role,
                    schedule.shadow_rank(&me, slot),
                    schedule.active.len(),
                    schedule.pool.len(),
                )
            }
            _ => (NodeRole::Observer, None, 0, 0),
        };

        let acnodes = self.acnodes.read().await;
        let record = acnodes.get(&self.producer_id);
        let is_accountable = record
            .map(|r| r.status == AcNodeStatus::Active)
            .unwrap_or(false);
        let has_valid_deposit = record
            .map(|r| r.deposit.satisfies_multiplier)
            .unwrap_or(false);
        drop(acnodes);

        EngineStatus {
            phase: core.phase,
            tip,
            epoch,
            slot,
            role,
            shadow_role,
            peers: self.peers.len(),
            tx_pool_size: self.mempool.size().await,
            is_accountable,
            has_valid_deposit,
            is_whitelisted: self.lists.read().await.is_whitelisted(&me),
            active_set_size,
            total_pool_size,
            blocks_proposed: core.blocks_proposed,
            blocks_validated: core.blocks_validated,
            last_block_time: core.last_block_time,
        }
    }
}
