use std::collections::BTreeMap;

use accord_core::{serialize, PublicKey};
use accord_state::{Storage, StoreKey, WriteOp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RegistryError;

/// Validator lifecycle. Records are never deleted, only transitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidatorStatus {
    ApprovalRequested,
    Active,
    Unbonding,
    Slashed,
    Exited,
}

impl ValidatorStatus {
    /// The legal lifecycle edges. Everything else is rejected.
    pub fn can_transition(self, next: ValidatorStatus) -> bool {
        use ValidatorStatus::*;
        matches!(
            (self, next),
            (ApprovalRequested, Active)
                | (Active, Unbonding)
                | (Active, Slashed)
                | (Unbonding, Slashed)
                | (Unbonding, Exited)
                | (Slashed, Exited)
        )
    }
}

/// A validator's delegation of signing duty to a consortium
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsortiumBinding {
    pub consortium_id: String,
    pub signing_key: PublicKey,
    /// Unix milliseconds when the validator granted control
    pub consent_timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorRecord {
    pub id: PublicKey,
    pub status: ValidatorStatus,
    pub deposit: u64,
    pub joined_at: u64,
    pub consortium: Option<ConsortiumBinding>,
}

impl ValidatorRecord {
    pub fn new(id: PublicKey, deposit: u64, joined_at: u64) -> Self {
        ValidatorRecord {
            id,
            status: ValidatorStatus::ApprovalRequested,
            deposit,
            joined_at,
            consortium: None,
        }
    }
}

/// Registry of validator identities, answering eligibility queries.
/// Records are cached in memory and persisted under `validator/<vid>/data`.
pub struct ValidatorRegistry {
    records: BTreeMap<PublicKey, ValidatorRecord>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        ValidatorRegistry {
            records: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, record: ValidatorRecord) -> Result<(), RegistryError> {
        if self.records.contains_key(&record.id) {
            return Err(RegistryError::AlreadyRegistered(record.id.to_hex()));
        }
        info!("Registered validator {}", record.id);
        self.records.insert(record.id, record);
        Ok(())
    }

    pub fn get(&self, id: &PublicKey) -> Option<&ValidatorRecord> {
        self.records.get(id)
    }

    pub fn transition(
        &mut self,
        id: &PublicKey,
        next: ValidatorStatus,
    ) -> Result<(), RegistryError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_hex()))?;

        if !record.status.can_transition(next) {
            return Err(RegistryError::IllegalValidatorTransition {
                from: record.status,
                to: next,
            });
        }

        debug!(
            "Validator {} transition {:?} -> {:?}",
            id, record.status, next
        );
        record.status = next;
        Ok(())
    }

    pub fn bind_consortium(
        &mut self,
        id: &PublicKey,
        binding: ConsortiumBinding,
    ) -> Result<(), RegistryError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_hex()))?;
        record.consortium = Some(binding);
        Ok(())
    }

    /// All ACTIVE validators, in key order. This is the eligible pool the
    /// scheduler samples the active set from.
    pub fn eligible_pool(&self) -> Vec<PublicKey> {
        self.records
            .values()
            .filter(|r| r.status == ValidatorStatus::Active)
            .map(|r| r.id)
            .collect()
    }

    pub fn is_active(&self, id: &PublicKey) -> bool {
        self.records
            .get(id)
            .map(|r| r.status == ValidatorStatus::Active)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Persist all records and the id list
    pub fn persist<S: Storage>(&self, storage: &mut S) -> Result<(), RegistryError> {
        let mut ops = Vec::with_capacity(self.records.len() + 1);
        for record in self.records.values() {
            let value = serialize::to_bytes(record)?;
            ops.push(WriteOp::put(StoreKey::validator_data(&record.id), value));
        }
        let ids: Vec<PublicKey> = self.records.keys().copied().collect();
        ops.push(WriteOp::put(
            StoreKey::validator_list(),
            serialize::to_bytes(&ids)?,
        ));
        storage.write_batch(ops)?;
        Ok(())
    }

    /// Load all records from storage
    pub fn load<S: Storage>(storage: &S) -> Result<Self, RegistryError> {
        let mut registry = ValidatorRegistry::new();

        let Some(list_bytes) = storage.get(StoreKey::validator_list().as_bytes()) else {
            return Ok(registry);
        };
        let ids: Vec<PublicKey> = serialize::from_bytes(&list_bytes)?;

        for id in ids {
            let key = StoreKey::validator_data(&id);
            if let Some(bytes) = storage.get(key.as_bytes()) {
                let record: ValidatorRecord = serialize::from_bytes(&bytes)?;
                registry.records.insert(record.id, record);
            }
        }

        Ok(registry)
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
