use std::collections::BTreeMap;

use accord_core::{hash_blake3, serialize, verify, NodeId, PublicKey, Sig};
use accord_state::{Storage, StoreKey, WriteOp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::RegistryError;

/// Accountable-node lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcNodeStatus {
    ApplicationPending,
    Active,
    Suspended,
    Unbonding,
    Withdrawn,
    Slashed,
}

impl AcNodeStatus {
    /// The legal lifecycle edges. WITHDRAWN and SLASHED are terminal;
    /// SUSPENDED is the only reversible detour.
    pub fn can_transition(self, next: AcNodeStatus) -> bool {
        use AcNodeStatus::*;
        matches!(
            (self, next),
            (ApplicationPending, Active)
                | (Active, Suspended)
                | (Suspended, Active)
                | (Active, Unbonding)
                | (Unbonding, Withdrawn)
                | (Active, Slashed)
                | (Suspended, Slashed)
                | (Unbonding, Slashed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Officer {
    pub name: String,
    pub role: String,
}

/// Legal identity disclosed by a block-producer candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalDisclosure {
    pub company_name: String,
    pub registration: String,
    /// Two-letter jurisdiction tag, checked against the approved list
    pub jurisdiction: String,
    pub business_address: String,
    /// Attested asset value; must meet the configured minimum
    pub attested_assets: u64,
    pub officers: Vec<Officer>,
}

/// One verification record attached by an attestor (foundation, custodian)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationEvidence {
    pub verifier: PublicKey,
    pub link: String,
    pub timestamp: u64,
    pub signature: Sig,
}

/// Bonded deposit backing a node's block production. The multiplier check
/// caches its last result but is always recomputed at proposal time because
/// transaction value fluctuates block to block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRecord {
    pub amount: u64,
    pub depositor: String,
    pub locked_at: u64,
    pub unlock_at: Option<u64>,
    pub last_total_value: u64,
    pub satisfies_multiplier: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountableNodeRecord {
    pub id: NodeId,
    pub public_key: PublicKey,
    pub status: AcNodeStatus,
    pub disclosure: LegalDisclosure,
    pub evidence: Vec<VerificationEvidence>,
    pub deposit: DepositRecord,
    pub applied_at: u64,
    pub activated_at: Option<u64>,
    pub status_changed_at: u64,
    /// Append-only references to open slashing cases
    pub open_cases: Vec<String>,
}

impl AccountableNodeRecord {
    pub fn new(
        id: NodeId,
        public_key: PublicKey,
        disclosure: LegalDisclosure,
        deposit_amount: u64,
        depositor: String,
        now: u64,
    ) -> Self {
        AccountableNodeRecord {
            id,
            public_key,
            status: AcNodeStatus::ApplicationPending,
            disclosure,
            evidence: Vec::new(),
            deposit: DepositRecord {
                amount: deposit_amount,
                depositor,
                locked_at: now,
                unlock_at: None,
                last_total_value: 0,
                satisfies_multiplier: true,
            },
            applied_at: now,
            activated_at: None,
            status_changed_at: now,
            open_cases: Vec::new(),
        }
    }
}

/// Governance parameters for admission and eligibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// M of the officer multisig required to activate an application
    pub signature_threshold_m: usize,
    /// Governance signers whose approvals count toward the threshold
    pub authorized_signers: Vec<PublicKey>,
    pub approved_jurisdictions: Vec<String>,
    pub min_attested_assets: u64,
    /// Deposit floor independent of transaction value
    pub base_deposit: u64,
    /// D >= deposit_multiplier * TV
    pub deposit_multiplier: u64,
    /// Milliseconds between UNBONDING and WITHDRAWN
    pub unbonding_delay_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            signature_threshold_m: 2,
            authorized_signers: Vec::new(),
            approved_jurisdictions: crate::acnode::default_jurisdictions(),
            min_attested_assets: 5_000_000,
            base_deposit: 100_000,
            deposit_multiplier: 2,
            unbonding_delay_ms: 7 * 24 * 60 * 60 * 1000,
        }
    }
}

/// Approved jurisdictions for accountability
pub fn default_jurisdictions() -> Vec<String> {
    ["US", "UK", "EU", "JP", "AU", "CH"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Bytes an officer signs to approve an application
pub fn admission_signing_bytes(node: &NodeId) -> Vec<u8> {
    hash_blake3(node.as_str().as_bytes()).to_vec()
}

/// Registry of business-accountable block producers. Cached in memory,
/// persisted under `acnode/data/<id>` plus the active list and deposit rows.
pub struct AccountableNodeRegistry {
    config: RegistryConfig,
    records: BTreeMap<NodeId, AccountableNodeRecord>,
}

impl AccountableNodeRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        AccountableNodeRegistry {
            config,
            records: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn get(&self, id: &NodeId) -> Option<&AccountableNodeRecord> {
        self.records.get(id)
    }

    pub fn find_by_pubkey(&self, key: &PublicKey) -> Option<&AccountableNodeRecord> {
        self.records.values().find(|r| r.public_key == *key)
    }

    /// File an application. The record enters APPLICATION_PENDING; disclosure
    /// completeness is checked here, admission is a separate governance step.
    pub fn apply(&mut self, record: AccountableNodeRecord) -> Result<(), RegistryError> {
        if self.records.contains_key(&record.id) {
            return Err(RegistryError::AlreadyRegistered(record.id.0.clone()));
        }
        if record.disclosure.attested_assets < self.config.min_attested_assets {
            return Err(RegistryError::InsufficientAssets {
                have: record.disclosure.attested_assets,
                need: self.config.min_attested_assets,
            });
        }
        info!(
            "Accountable node application filed: {} ({})",
            record.id, record.disclosure.company_name
        );
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn add_evidence(
        &mut self,
        id: &NodeId,
        evidence: VerificationEvidence,
    ) -> Result<(), RegistryError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.0.clone()))?;
        record.evidence.push(evidence);
        Ok(())
    }

    /// Governance approval: requires M distinct authorized signers over the
    /// admission digest, and an approved jurisdiction.
    pub fn approve(
        &mut self,
        id: &NodeId,
        approvals: &[(PublicKey, Sig)],
        now: u64,
    ) -> Result<(), RegistryError> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.0.clone()))?;

        if !self
            .config
            .approved_jurisdictions
            .contains(&record.disclosure.jurisdiction)
        {
            return Err(RegistryError::JurisdictionNotApproved(
                record.disclosure.jurisdiction.clone(),
            ));
        }

        let digest = admission_signing_bytes(id);
        let mut valid_signers = std::collections::BTreeSet::new();
        for (signer, sig) in approvals {
            if !self.config.authorized_signers.contains(signer) {
                return Err(RegistryError::UnauthorizedSigner(signer.to_hex()));
            }
            if verify(signer, &digest, sig).is_ok() {
                valid_signers.insert(*signer);
            } else {
                warn!("Invalid admission signature from {}", signer);
            }
        }

        if valid_signers.len() < self.config.signature_threshold_m {
            return Err(RegistryError::InsufficientSignatures {
                have: valid_signers.len(),
                need: self.config.signature_threshold_m,
            });
        }

        self.transition(id, AcNodeStatus::Active, now)?;
        let record = self.records.get_mut(id).expect("record exists");
        record.activated_at = Some(now);
        info!("Accountable node {} activated", id);
        Ok(())
    }

    pub fn suspend(&mut self, id: &NodeId, now: u64) -> Result<(), RegistryError> {
        self.transition(id, AcNodeStatus::Suspended, now)
    }

    pub fn reinstate(&mut self, id: &NodeId, now: u64) -> Result<(), RegistryError> {
        self.transition(id, AcNodeStatus::Active, now)
    }

    /// Voluntary exit; sets the deposit unlock height
    pub fn begin_unbonding(&mut self, id: &NodeId, now: u64) -> Result<(), RegistryError> {
        self.transition(id, AcNodeStatus::Unbonding, now)?;
        let record = self.records.get_mut(id).expect("record exists");
        record.deposit.unlock_at = Some(now + self.config.unbonding_delay_ms);
        Ok(())
    }

    /// Release the deposit after the unbonding delay
    pub fn withdraw(&mut self, id: &NodeId, now: u64) -> Result<u64, RegistryError> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.0.clone()))?;

        match record.deposit.unlock_at {
            Some(unlock) if now >= unlock => {}
            _ => return Err(RegistryError::UnbondingNotElapsed),
        }

        self.transition(id, AcNodeStatus::Withdrawn, now)?;
        let record = self.records.get_mut(id).expect("record exists");
        let released = record.deposit.amount;
        record.deposit.amount = 0;
        info!("Accountable node {} withdrawn, released {}", id, released);
        Ok(released)
    }

    /// Terminal removal via a resolved slashing case. Returns the
    /// confiscated deposit amount for routing by the caller.
    pub fn slash(&mut self, id: &NodeId, now: u64) -> Result<u64, RegistryError> {
        self.transition(id, AcNodeStatus::Slashed, now)?;
        let record = self.records.get_mut(id).expect("record exists");
        let confiscated = record.deposit.amount;
        record.deposit.amount = 0;
        warn!("Accountable node {} slashed, confiscated {}", id, confiscated);
        Ok(confiscated)
    }

    pub fn attach_case(&mut self, id: &NodeId, case_id: &str) -> Result<(), RegistryError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.0.clone()))?;
        record.open_cases.push(case_id.to_string());
        Ok(())
    }

    /// The deposit floor for a block carrying `total_value`:
    /// max(base deposit, multiplier * TV).
    pub fn required_deposit(&self, total_value: u64) -> u64 {
        self.config
            .base_deposit
            .max(self.config.deposit_multiplier.saturating_mul(total_value))
    }

    /// Re-derived at proposal time, never cached: ACTIVE status, approved
    /// jurisdiction, and a deposit covering the current block value.
    pub fn check_producer_eligibility(
        &self,
        id: &NodeId,
        block_total_value: u64,
    ) -> Result<(), RegistryError> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.0.clone()))?;

        if record.status != AcNodeStatus::Active {
            return Err(RegistryError::NodeNotActive {
                id: id.0.clone(),
                status: record.status,
            });
        }

        if !self
            .config
            .approved_jurisdictions
            .contains(&record.disclosure.jurisdiction)
        {
            return Err(RegistryError::JurisdictionNotApproved(
                record.disclosure.jurisdiction.clone(),
            ));
        }

        let required = self.required_deposit(block_total_value);
        if record.deposit.amount < required {
            return Err(RegistryError::DepositInsufficient {
                required,
                actual: record.deposit.amount,
            });
        }

        Ok(())
    }

    /// Record the block value the node last produced under, refreshing the
    /// cached multiplier verdict.
    pub fn record_block_value(
        &mut self,
        id: &NodeId,
        total_value: u64,
    ) -> Result<(), RegistryError> {
        let required = self.required_deposit(total_value);
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.0.clone()))?;
        record.deposit.last_total_value = total_value;
        record.deposit.satisfies_multiplier = record.deposit.amount >= required;
        Ok(())
    }

    pub fn active_nodes(&self) -> Vec<&AccountableNodeRecord> {
        self.records
            .values()
            .filter(|r| r.status == AcNodeStatus::Active)
            .collect()
    }

    fn transition(
        &mut self,
        id: &NodeId,
        next: AcNodeStatus,
        now: u64,
    ) -> Result<(), RegistryError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.0.clone()))?;

        if !record.status.can_transition(next) {
            return Err(RegistryError::IllegalNodeTransition {
                from: record.status,
                to: next,
            });
        }

        debug!("Node {} transition {:?} -> {:?}", id, record.status, next);
        record.status = next;
        record.status_changed_at = now;
        Ok(())
    }

    /// Persist records, the active list, and per-node deposit rows
    pub fn persist<S: Storage>(&self, storage: &mut S) -> Result<(), RegistryError> {
        let mut ops = Vec::with_capacity(self.records.len() * 2 + 1);
        for record in self.records.values() {
            ops.push(WriteOp::put(
                StoreKey::acnode_data(&record.id),
                serialize::to_bytes(record)?,
            ));
            ops.push(WriteOp::put(
                StoreKey::deposit(record.id.as_str()),
                serialize::to_bytes(&record.deposit)?,
            ));
        }
        let active: Vec<NodeId> = self
            .records
            .values()
            .filter(|r| r.status == AcNodeStatus::Active)
            .map(|r| r.id.clone())
            .collect();
        ops.push(WriteOp::put(
            StoreKey::acnode_active_list(),
            serialize::to_bytes(&active)?,
        ));
        storage.write_batch(ops)?;
        Ok(())
    }

    pub fn load<S: Storage>(storage: &S, config: RegistryConfig) -> Result<Self, RegistryError> {
        let mut registry = AccountableNodeRegistry::new(config);

        let prefix = b"acnode/data/";
        for key in storage.keys_with_prefix(prefix) {
            if let Some(bytes) = storage.get(&key) {
                let record: AccountableNodeRecord = serialize::from_bytes(&bytes)?;
                registry.records.insert(record.id.clone(), record);
            }
        }

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::{sign, KeyPair};
    use accord_state::MemoryStorage;

    fn disclosure(jurisdiction: &str) -> LegalDisclosure {
        LegalDisclosure {
            company_name: "Acme Ledger GmbH".to_string(),
            registration: "HRB 12345".to_string(),
            jurisdiction: jurisdiction.to_string(),
            business_address: "1 Chain St".to_string(),
            attested_assets: 5_000_000,
            officers: vec![Officer {
                name: "J. Doe".to_string(),
                role: "CEO".to_string(),
            }],
        }
    }

    fn setup_registry(signers: &[KeyPair]) -> AccountableNodeRegistry {
        let config = RegistryConfig {
            signature_threshold_m: 2,
            authorized_signers: signers.iter().map(|k| k.public).collect(),
            base_deposit: 100_000,
            deposit_multiplier: 2,
            unbonding_delay_ms: 1000,
            ..Default::default()
        };
        AccountableNodeRegistry::new(config)
    }

    fn pending_node(id: &str, deposit: u64, jurisdiction: &str) -> AccountableNodeRecord {
        AccountableNodeRecord::new(
            NodeId::new(id),
            KeyPair::generate().public,
            disclosure(jurisdiction),
            deposit,
            "treasury".to_string(),
            0,
        )
    }

    fn admission_sigs(node: &NodeId, signers: &[KeyPair]) -> Vec<(PublicKey, Sig)> {
        let digest = admission_signing_bytes(node);
        signers
            .iter()
            .map(|k| (k.public, sign(&k.secret, &digest)))
            .collect()
    }

    #[test]
    fn test_admission_with_multisig() {
        let signers: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        let mut registry = setup_registry(&signers);
        let node = pending_node("acme", 1_000_000, "CH");
        let id = node.id.clone();
        registry.apply(node).unwrap();

        // One signature is below the threshold of two
        let short = admission_sigs(&id, &signers[..1]);
        assert!(matches!(
            registry.approve(&id, &short, 10),
            Err(RegistryError::InsufficientSignatures { have: 1, need: 2 })
        ));

        let enough = admission_sigs(&id, &signers[..2]);
        registry.approve(&id, &enough, 10).unwrap();
        assert_eq!(registry.get(&id).unwrap().status, AcNodeStatus::Active);
        assert_eq!(registry.get(&id).unwrap().activated_at, Some(10));
    }

    #[test]
    fn test_unauthorized_signer_rejected() {
        let signers: Vec<KeyPair> = (0..2).map(|_| KeyPair::generate()).collect();
        let mut registry = setup_registry(&signers);
        let node = pending_node("acme", 1_000_000, "US");
        let id = node.id.clone();
        registry.apply(node).unwrap();

        let outsider = KeyPair::generate();
        let sigs = admission_sigs(&id, &[outsider]);
        assert!(matches!(
            registry.approve(&id, &sigs, 10),
            Err(RegistryError::UnauthorizedSigner(_))
        ));
    }

    #[test]
    fn test_jurisdiction_enforced() {
        let signers: Vec<KeyPair> = (0..2).map(|_| KeyPair::generate()).collect();
        let mut registry = setup_registry(&signers);
        let node = pending_node("offshore", 1_000_000, "XX");
        let id = node.id.clone();
        registry.apply(node).unwrap();

        let sigs = admission_sigs(&id, &signers);
        assert!(matches!(
            registry.approve(&id, &sigs, 10),
            Err(RegistryError::JurisdictionNotApproved(_))
        ));
    }

    #[test]
    fn test_insufficient_assets_rejected_at_application() {
        let signers: Vec<KeyPair> = (0..2).map(|_| KeyPair::generate()).collect();
        let mut registry = setup_registry(&signers);
        let mut node = pending_node("small", 1_000_000, "US");
        node.disclosure.attested_assets = 1_000;

        assert!(matches!(
            registry.apply(node),
            Err(RegistryError::InsufficientAssets { .. })
        ));
    }

    #[test]
    fn test_deposit_sufficiency_scenarios() {
        // Deposit 1,000,000 with multiplier 2: TV 600,000 rejected
        // (1,000,000 < 1,200,000), TV 400,000 accepted (1,000,000 >= 800,000).
        let signers: Vec<KeyPair> = (0..2).map(|_| KeyPair::generate()).collect();
        let mut registry = setup_registry(&signers);
        let node = pending_node("acme", 1_000_000, "US");
        let id = node.id.clone();
        registry.apply(node).unwrap();
        registry
            .approve(&id, &admission_sigs(&id, &signers), 10)
            .unwrap();

        assert!(matches!(
            registry.check_producer_eligibility(&id, 600_000),
            Err(RegistryError::DepositInsufficient {
                required: 1_200_000,
                actual: 1_000_000
            })
        ));
        assert!(registry.check_producer_eligibility(&id, 400_000).is_ok());
    }

    #[test]
    fn test_eligibility_rechecked_against_status() {
        let signers: Vec<KeyPair> = (0..2).map(|_| KeyPair::generate()).collect();
        let mut registry = setup_registry(&signers);
        let node = pending_node("acme", 1_000_000, "US");
        let id = node.id.clone();
        registry.apply(node).unwrap();

        // Still pending: not eligible even with plenty of deposit
        assert!(registry.check_producer_eligibility(&id, 0).is_err());

        registry
            .approve(&id, &admission_sigs(&id, &signers), 10)
            .unwrap();
        assert!(registry.check_producer_eligibility(&id, 0).is_ok());

        registry.suspend(&id, 20).unwrap();
        assert!(registry.check_producer_eligibility(&id, 0).is_err());
    }

    #[test]
    fn test_unbonding_and_withdraw() {
        let signers: Vec<KeyPair> = (0..2).map(|_| KeyPair::generate()).collect();
        let mut registry = setup_registry(&signers);
        let node = pending_node("acme", 1_000_000, "US");
        let id = node.id.clone();
        registry.apply(node).unwrap();
        registry
            .approve(&id, &admission_sigs(&id, &signers), 10)
            .unwrap();

        registry.begin_unbonding(&id, 100).unwrap();
        // Delay (1000ms) has not elapsed
        assert!(matches!(
            registry.withdraw(&id, 500),
            Err(RegistryError::UnbondingNotElapsed)
        ));

        let released = registry.withdraw(&id, 1200).unwrap();
        assert_eq!(released, 1_000_000);
        assert_eq!(registry.get(&id).unwrap().status, AcNodeStatus::Withdrawn);
        // Terminal: no way back
        assert!(registry.reinstate(&id, 1300).is_err());
    }

    #[test]
    fn test_slash_confiscates_deposit() {
        let signers: Vec<KeyPair> = (0..2).map(|_| KeyPair::generate()).collect();
        let mut registry = setup_registry(&signers);
        let node = pending_node("acme", 1_000_000, "US");
        let id = node.id.clone();
        registry.apply(node).unwrap();
        registry
            .approve(&id, &admission_sigs(&id, &signers), 10)
            .unwrap();

        let confiscated = registry.slash(&id, 50).unwrap();
        assert_eq!(confiscated, 1_000_000);
        assert_eq!(registry.get(&id).unwrap().status, AcNodeStatus::Slashed);
        assert_eq!(registry.get(&id).unwrap().deposit.amount, 0);
    }

    #[test]
    fn test_persist_and_load() {
        let signers: Vec<KeyPair> = (0..2).map(|_| KeyPair::generate()).collect();
        let mut registry = setup_registry(&signers);
        let node = pending_node("acme", 1_000_000, "US");
        let id = node.id.clone();
        registry.apply(node).unwrap();
        registry
            .approve(&id, &admission_sigs(&id, &signers), 10)
            .unwrap();
        registry.record_block_value(&id, 400_000).unwrap();

        let mut storage = MemoryStorage::new();
        registry.persist(&mut storage).unwrap();

        let loaded =
            AccountableNodeRegistry::load(&storage, registry.config().clone()).unwrap();
        let record = loaded.get(&id).unwrap();
        assert_eq!(record.status, AcNodeStatus::Active);
        assert_eq!(record.deposit.last_total_value, 400_000);
        assert!(record.deposit.satisfies_multiplier);
        assert_eq!(loaded.active_nodes().len(), 1);
    }
}
