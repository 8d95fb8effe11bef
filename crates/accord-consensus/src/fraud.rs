use std::collections::HashMap;

use accord_core::{Approval, Block, Hash, NodeId, PublicKey};
use accord_registry::{Evidence, EvidenceDetail, FraudKind, FraudReport, Party};
use tracing::warn;

/// Observes consensus traffic and raises fraud candidates. The monitor only
/// proposes: reports become slashing cases for governance, it never slashes.
pub struct FraudMonitor {
    /// Proposals seen per (epoch, slot): block hash -> proposer
    proposals: HashMap<(u64, u64), Vec<(Hash, PublicKey)>>,
}

impl FraudMonitor {
    pub fn new() -> Self {
        FraudMonitor {
            proposals: HashMap::new(),
        }
    }

    /// Whether any proposal was seen for the slot (drives shadow promotion)
    pub fn has_proposal(&self, epoch_id: u64, slot: u64) -> bool {
        self.proposals
            .get(&(epoch_id, slot))
            .map(|seen| !seen.is_empty())
            .unwrap_or(false)
    }

    /// The canonical block hash for a slot: the lexicographically smallest
    /// among observed proposals.
    pub fn canonical_for(&self, epoch_id: u64, slot: u64) -> Option<Hash> {
        self.proposals
            .get(&(epoch_id, slot))
            .and_then(|seen| seen.iter().map(|(hash, _)| *hash).min())
    }

    /// Record a proposal. If the slot now carries conflicting proposals,
    /// report every non-canonical one as a consensus violation.
    pub fn observe_proposal(
        &mut self,
        epoch_id: u64,
        slot: u64,
        block_hash: Hash,
        proposer: PublicKey,
        now: u64,
    ) -> Vec<FraudReport> {
        let seen = self.proposals.entry((epoch_id, slot)).or_default();
        if !seen.iter().any(|(hash, _)| *hash == block_hash) {
            seen.push((block_hash, proposer));
        }

        if seen.len() < 2 {
            return Vec::new();
        }

        let canonical = seen
            .iter()
            .map(|(hash, _)| *hash)
            .min()
            .expect("non-empty proposal set");

        seen.iter()
            .filter(|(hash, _)| *hash != canonical)
            .map(|(hash, proposer)| {
                warn!(
                    "Equivocation in epoch {} slot {}: canonical {}, conflicting {} from {}",
                    epoch_id, slot, canonical, hash, proposer
                );
                FraudReport {
                    kind: FraudKind::ConsensusViolation,
                    perpetrator: Party::Validator(*proposer),
                    evidence: Evidence::v1(EvidenceDetail::ConflictingProposals {
                        epoch_id,
                        slot,
                        canonical,
                        conflicting: *hash,
                    }),
                    reported_at: now,
                }
            })
            .collect()
    }

    /// Record an approval. Approving a non-canonical proposal for a slot
    /// with a known conflict is a false-approval candidate.
    pub fn observe_approval(
        &self,
        epoch_id: u64,
        slot: u64,
        approval: &Approval,
        now: u64,
    ) -> Option<FraudReport> {
        let canonical = self.canonical_for(epoch_id, slot)?;
        if approval.block_hash == canonical {
            return None;
        }

        warn!(
            "False approval candidate: {} approved {} in epoch {} slot {} (canonical {})",
            approval.validator, approval.block_hash, epoch_id, slot, canonical
        );
        Some(FraudReport {
            kind: FraudKind::FalseApproval,
            perpetrator: Party::Validator(approval.validator),
            evidence: Evidence::v1(EvidenceDetail::ConflictingApproval {
                epoch_id,
                slot,
                canonical,
                approved: approval.block_hash,
            }),
            reported_at: now,
        })
    }

    /// Check block transaction ordering (arrival timestamp, then salt)
    pub fn check_ordering(
        &self,
        block: &Block,
        proposer: PublicKey,
        now: u64,
    ) -> Option<FraudReport> {
        if block.is_arrival_ordered() {
            return None;
        }

        let block_hash = block.hash().ok()?;
        warn!("Malicious ordering in block {} from {}", block_hash, proposer);
        Some(FraudReport {
            kind: FraudKind::MaliciousOrdering,
            perpetrator: Party::Validator(proposer),
            evidence: Evidence::v1(EvidenceDetail::UnorderedTransactions { block_hash }),
            reported_at: now,
        })
    }

    /// Report a producer whose deposit no longer covers the block value
    pub fn report_deposit_violation(
        &self,
        producer: NodeId,
        block_hash: Hash,
        required: u64,
        actual: u64,
        now: u64,
    ) -> FraudReport {
        warn!(
            "Deposit violation by {}: required {}, actual {}",
            producer, required, actual
        );
        FraudReport {
            kind: FraudKind::DepositViolation,
            perpetrator: Party::Node(producer),
            evidence: Evidence::v1(EvidenceDetail::DepositShortfall {
                block_hash,
                required,
                actual,
            }),
            reported_at: now,
        }
    }

    /// Report an unverifiable message signature
    pub fn report_bad_signature(
        &self,
        signer: PublicKey,
        context: &str,
        now: u64,
    ) -> FraudReport {
        FraudReport {
            kind: FraudKind::InvalidSignature,
            perpetrator: Party::Validator(signer),
            evidence: Evidence::v1(EvidenceDetail::BadMessageSignature {
                context: context.to_string(),
            }),
            reported_at: now,
        }
    }

    /// Drop slot bookkeeping older than the given slot (same-epoch cleanup)
    pub fn forget_before(&mut self, epoch_id: u64, slot: u64) {
        self.proposals
            .retain(|(e, s), _| *e > epoch_id || (*e == epoch_id && *s >= slot));
    }
}

impl Default for FraudMonitor {
    fn default() -> Self {
        Self::new()
    }
}
