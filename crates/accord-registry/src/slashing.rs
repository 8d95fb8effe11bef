use std::collections::BTreeMap;
use std::fmt;

use accord_core::{hash_blake3, serialize, Hash, NodeId, PublicKey};
use accord_state::{Storage, StoreKey, WriteOp};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::RegistryError;

/// Consensus violations the monitor can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FraudKind {
    SyntheticTransaction,
    DoubleSpending,
    InvalidSignature,
    ConsensusViolation,
    MaliciousOrdering,
    DepositViolation,
    FalseApproval,
}

/// The accused party: a validator (keyed by public key) or an accountable
/// node (keyed by operator id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Party {
    Validator(PublicKey),
    Node(NodeId),
}

impl Party {
    /// Stable identifier used in storage paths
    pub fn storage_id(&self) -> String {
        match self {
            Party::Validator(pk) => pk.to_hex(),
            Party::Node(id) => id.0.clone(),
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.storage_id())
    }
}

/// Structured, versioned evidence payload. The version gates how `detail`
/// is interpreted by auditors; unknown future variants round-trip through
/// `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub version: u16,
    pub detail: EvidenceDetail,
}

impl Evidence {
    pub fn v1(detail: EvidenceDetail) -> Self {
        Evidence { version: 1, detail }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceDetail {
    ConflictingProposals {
        epoch_id: u64,
        slot: u64,
        canonical: Hash,
        conflicting: Hash,
    },
    ConflictingApproval {
        epoch_id: u64,
        slot: u64,
        canonical: Hash,
        approved: Hash,
    },
    UnorderedTransactions {
        block_hash: Hash,
    },
    DepositShortfall {
        block_hash: Hash,
        required: u64,
        actual: u64,
    },
    BadMessageSignature {
        context: String,
    },
    Other {
        description: String,
    },
}

/// A candidate violation raised by the fraud monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudReport {
    pub kind: FraudKind,
    pub perpetrator: Party,
    pub evidence: Evidence,
    pub reported_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseStatus {
    Open,
    UnderReview,
    Dismissed,
    Slashed,
}

/// Where a confiscated deposit goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PenaltyRoute {
    Burn,
    Treasury,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionAction {
    Dismiss,
    Slash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResolution {
    pub action: ResolutionAction,
    pub penalty: u64,
    pub route: PenaltyRoute,
    /// Governance transaction that carried the resolution
    pub tx_id: Option<Hash>,
    pub resolved_at: u64,
}

/// A slashing case. Created from a fraud report, resolved only by
/// governance, immutable once resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlashingCase {
    pub id: String,
    pub accused: Party,
    pub kind: FraudKind,
    pub evidence: Evidence,
    pub reporter: Party,
    pub status: CaseStatus,
    pub resolution: Option<CaseResolution>,
    pub opened_at: u64,
}

/// The set of slashing cases known to this node. The monitor opens cases;
/// only governance resolutions mutate them afterwards.
pub struct SlashingDocket {
    cases: BTreeMap<String, SlashingCase>,
}

impl SlashingDocket {
    pub fn new() -> Self {
        SlashingDocket {
            cases: BTreeMap::new(),
        }
    }

    pub fn get(&self, case_id: &str) -> Option<&SlashingCase> {
        self.cases.get(case_id)
    }

    pub fn open_cases(&self) -> impl Iterator<Item = &SlashingCase> {
        self.cases
            .values()
            .filter(|c| matches!(c.status, CaseStatus::Open | CaseStatus::UnderReview))
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Open a case from a fraud report. The case id is derived from the
    /// report content so duplicate observations collapse onto one case.
    pub fn open_case(&mut self, report: FraudReport, reporter: Party) -> Result<String, RegistryError> {
        let digest = hash_blake3(&serialize::to_bytes(&(
            &report.kind,
            &report.perpetrator,
            &report.evidence,
        ))?);
        let case_id = hex::encode(&digest.as_bytes()[..16]);

        if self.cases.contains_key(&case_id) {
            return Ok(case_id);
        }

        warn!(
            "Opening slashing case {} against {} ({:?})",
            case_id, report.perpetrator, report.kind
        );

        let case = SlashingCase {
            id: case_id.clone(),
            accused: report.perpetrator,
            kind: report.kind,
            evidence: report.evidence,
            reporter,
            status: CaseStatus::Open,
            resolution: None,
            opened_at: report.reported_at,
        };
        self.cases.insert(case_id.clone(), case);
        Ok(case_id)
    }

    pub fn mark_under_review(&mut self, case_id: &str) -> Result<(), RegistryError> {
        let case = self
            .cases
            .get_mut(case_id)
            .ok_or_else(|| RegistryError::CaseNotFound(case_id.to_string()))?;
        if case.resolution.is_some() {
            return Err(RegistryError::CaseAlreadyResolved(case_id.to_string()));
        }
        case.status = CaseStatus::UnderReview;
        Ok(())
    }

    /// Apply a governance resolution. A resolved case cannot be resolved
    /// again.
    pub fn resolve(
        &mut self,
        case_id: &str,
        resolution: CaseResolution,
    ) -> Result<&SlashingCase, RegistryError> {
        let case = self
            .cases
            .get_mut(case_id)
            .ok_or_else(|| RegistryError::CaseNotFound(case_id.to_string()))?;

        if case.resolution.is_some() {
            return Err(RegistryError::CaseAlreadyResolved(case_id.to_string()));
        }

        case.status = match resolution.action {
            ResolutionAction::Dismiss => CaseStatus::Dismissed,
            ResolutionAction::Slash => CaseStatus::Slashed,
        };
        info!(
            "Slashing case {} resolved: {:?} (penalty {}, route {:?})",
            case_id, resolution.action, resolution.penalty, resolution.route
        );
        case.resolution = Some(resolution);
        Ok(case)
    }

    /// Persist cases under `acnode/event/<caseId>/<accusedId>`
    pub fn persist<S: Storage>(&self, storage: &mut S) -> Result<(), RegistryError> {
        let mut ops = Vec::with_capacity(self.cases.len());
        for case in self.cases.values() {
            let node_path = NodeId::new(case.accused.storage_id());
            ops.push(WriteOp::put(
                StoreKey::acnode_event(&case.id, &node_path),
                serialize::to_bytes(case)?,
            ));
        }
        storage.write_batch(ops)?;
        Ok(())
    }

    pub fn load<S: Storage>(storage: &S) -> Result<Self, RegistryError> {
        let mut docket = SlashingDocket::new();
        for key in storage.keys_with_prefix(StoreKey::acnode_event_prefix().as_bytes()) {
            if let Some(bytes) = storage.get(&key) {
                let case: SlashingCase = serialize::from_bytes(&bytes)?;
                docket.cases.insert(case.id.clone(), case);
            }
        }
        Ok(docket)
    }
}

impl Default for SlashingDocket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::KeyPair;
    use accord_state::MemoryStorage;

    fn sample_report(perpetrator: Party) -> FraudReport {
        FraudReport {
            kind: FraudKind::ConsensusViolation,
            perpetrator,
            evidence: Evidence::v1(EvidenceDetail::ConflictingProposals {
                epoch_id: 3,
                slot: 11,
                canonical: Hash::ZERO,
                conflicting: hash_blake3(b"other"),
            }),
            reported_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_open_case_is_deduplicated() {
        let mut docket = SlashingDocket::new();
        let accused = Party::Validator(KeyPair::generate().public);
        let reporter = Party::Node(NodeId::new("watcher"));

        let id1 = docket
            .open_case(sample_report(accused.clone()), reporter.clone())
            .unwrap();
        let id2 = docket
            .open_case(sample_report(accused), reporter)
            .unwrap();

        assert_eq!(id1, id2);
        assert_eq!(docket.len(), 1);
    }

    #[test]
    fn test_resolution_is_final() {
        let mut docket = SlashingDocket::new();
        let accused = Party::Node(NodeId::new("acme"));
        let reporter = Party::Node(NodeId::new("watcher"));
        let case_id = docket
            .open_case(sample_report(accused), reporter)
            .unwrap();

        let resolution = CaseResolution {
            action: ResolutionAction::Slash,
            penalty: 1_000_000,
            route: PenaltyRoute::Treasury,
            tx_id: None,
            resolved_at: 1_700_000_001_000,
        };
        let case = docket.resolve(&case_id, resolution.clone()).unwrap();
        assert_eq!(case.status, CaseStatus::Slashed);

        // Second resolution attempt fails, dismissals included
        let again = docket.resolve(
            &case_id,
            CaseResolution {
                action: ResolutionAction::Dismiss,
                penalty: 0,
                route: PenaltyRoute::Burn,
                tx_id: None,
                resolved_at: 1_700_000_002_000,
            },
        );
        assert!(matches!(again, Err(RegistryError::CaseAlreadyResolved(_))));
    }

    #[test]
    fn test_under_review_then_dismiss() {
        let mut docket = SlashingDocket::new();
        let case_id = docket
            .open_case(
                sample_report(Party::Node(NodeId::new("acme"))),
                Party::Node(NodeId::new("watcher")),
            )
            .unwrap();

        docket.mark_under_review(&case_id).unwrap();
        assert_eq!(docket.get(&case_id).unwrap().status, CaseStatus::UnderReview);

        docket
            .resolve(
                &case_id,
                CaseResolution {
                    action: ResolutionAction::Dismiss,
                    penalty: 0,
                    route: PenaltyRoute::Burn,
                    tx_id: None,
                    resolved_at: 42,
                },
            )
            .unwrap();
        assert_eq!(docket.get(&case_id).unwrap().status, CaseStatus::Dismissed);
        assert_eq!(docket.open_cases().count(), 0);
    }

    #[test]
    fn test_persist_and_load() {
        let mut docket = SlashingDocket::new();
        let case_id = docket
            .open_case(
                sample_report(Party::Node(NodeId::new("acme"))),
                Party::Node(NodeId::new("watcher")),
            )
            .unwrap();

        let mut storage = MemoryStorage::new();
        docket.persist(&mut storage).unwrap();

        let loaded = SlashingDocket::load(&storage).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get(&case_id).unwrap().kind, FraudKind::ConsensusViolation);
    }
}
