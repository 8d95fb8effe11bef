use std::collections::BTreeMap;

use accord_core::{serialize, PublicKey};
use accord_state::{Storage, StoreKey, WriteOp};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RegistryError;

/// A collaborator in good standing, with production counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub public_key: PublicKey,
    /// Block height the entry was added at
    pub added_at: u64,
    pub reputation: u64,
    pub blocks_created: u64,
    pub blocks_validated: u64,
}

/// A removed collaborator and the reason for removal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub public_key: PublicKey,
    pub reason: String,
    /// Reference to the resolved slashing case
    pub evidence: String,
    pub added_at: u64,
    pub confiscated_deposit: u64,
}

/// The PoC whitelist/blacklist, persisted under `poc/whitelist/` and
/// `poc/blacklist/`. A key present on the blacklist is never whitelisted.
pub struct CollaborationLists {
    whitelist: BTreeMap<PublicKey, WhitelistEntry>,
    blacklist: BTreeMap<PublicKey, BlacklistEntry>,
}

impl CollaborationLists {
    pub fn new() -> Self {
        CollaborationLists {
            whitelist: BTreeMap::new(),
            blacklist: BTreeMap::new(),
        }
    }

    pub fn is_whitelisted(&self, key: &PublicKey) -> bool {
        self.whitelist.contains_key(key) && !self.blacklist.contains_key(key)
    }

    pub fn is_blacklisted(&self, key: &PublicKey) -> bool {
        self.blacklist.contains_key(key)
    }

    pub fn whitelist_entry(&self, key: &PublicKey) -> Option<&WhitelistEntry> {
        self.whitelist.get(key)
    }

    pub fn add_to_whitelist(&mut self, key: PublicKey, added_at: u64) {
        self.whitelist.entry(key).or_insert(WhitelistEntry {
            public_key: key,
            added_at,
            reputation: 0,
            blocks_created: 0,
            blocks_validated: 0,
        });
    }

    pub fn record_block_created(&mut self, key: &PublicKey) {
        if let Some(entry) = self.whitelist.get_mut(key) {
            entry.blocks_created += 1;
            entry.reputation += 1;
        }
    }

    pub fn record_block_validated(&mut self, key: &PublicKey) {
        if let Some(entry) = self.whitelist.get_mut(key) {
            entry.blocks_validated += 1;
        }
    }

    /// Move a collaborator to the blacklist; drops any whitelist entry.
    pub fn add_to_blacklist(&mut self, entry: BlacklistEntry) {
        info!(
            "Blacklisting {} ({}), confiscated {}",
            entry.public_key, entry.reason, entry.confiscated_deposit
        );
        self.whitelist.remove(&entry.public_key);
        self.blacklist.insert(entry.public_key, entry);
    }

    pub fn persist<S: Storage>(&self, storage: &mut S) -> Result<(), RegistryError> {
        let mut ops = Vec::with_capacity(self.whitelist.len() + self.blacklist.len());
        for entry in self.whitelist.values() {
            ops.push(WriteOp::put(
                StoreKey::whitelist(&entry.public_key.to_hex()),
                serialize::to_bytes(entry)?,
            ));
        }
        for entry in self.blacklist.values() {
            // A blacklisted key must not linger under the whitelist prefix
            ops.push(WriteOp::del(StoreKey::whitelist(&entry.public_key.to_hex())));
            ops.push(WriteOp::put(
                StoreKey::blacklist(&entry.public_key.to_hex()),
                serialize::to_bytes(entry)?,
            ));
        }
        storage.write_batch(ops)?;
        Ok(())
    }

    pub fn load<S: Storage>(storage: &S) -> Result<Self, RegistryError> {
        let mut lists = CollaborationLists::new();

        for key in storage.keys_with_prefix(b"poc/whitelist/") {
            if let Some(bytes) = storage.get(&key) {
                let entry: WhitelistEntry = serialize::from_bytes(&bytes)?;
                lists.whitelist.insert(entry.public_key, entry);
            }
        }
        for key in storage.keys_with_prefix(b"poc/blacklist/") {
            if let Some(bytes) = storage.get(&key) {
                let entry: BlacklistEntry = serialize::from_bytes(&bytes)?;
                lists.blacklist.insert(entry.public_key, entry);
            }
        }

        Ok(lists)
    }
}

impl Default for CollaborationLists {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::KeyPair;
    use accord_state::MemoryStorage;

    #[test]
    fn test_whitelist_counters() {
        let mut lists = CollaborationLists::new();
        let key = KeyPair::generate().public;

        lists.add_to_whitelist(key, 5);
        lists.record_block_created(&key);
        lists.record_block_created(&key);
        lists.record_block_validated(&key);

        let entry = lists.whitelist_entry(&key).unwrap();
        assert_eq!(entry.blocks_created, 2);
        assert_eq!(entry.blocks_validated, 1);
        assert!(lists.is_whitelisted(&key));
    }

    #[test]
    fn test_blacklist_overrides_whitelist() {
        let mut lists = CollaborationLists::new();
        let key = KeyPair::generate().public;

        lists.add_to_whitelist(key, 5);
        lists.add_to_blacklist(BlacklistEntry {
            public_key: key,
            reason: "consensus_violation".to_string(),
            evidence: "case-abc".to_string(),
            added_at: 9,
            confiscated_deposit: 1_000_000,
        });

        assert!(!lists.is_whitelisted(&key));
        assert!(lists.is_blacklisted(&key));
    }

    #[test]
    fn test_persist_and_load() {
        let mut lists = CollaborationLists::new();
        let good = KeyPair::generate().public;
        let bad = KeyPair::generate().public;

        lists.add_to_whitelist(good, 1);
        lists.add_to_blacklist(BlacklistEntry {
            public_key: bad,
            reason: "false_approval".to_string(),
            evidence: "case-def".to_string(),
            added_at: 2,
            confiscated_deposit: 500,
        });

        let mut storage = MemoryStorage::new();
        lists.persist(&mut storage).unwrap();

        let loaded = CollaborationLists::load(&storage).unwrap();
        assert!(loaded.is_whitelisted(&good));
        assert!(loaded.is_blacklisted(&bad));
    }
}
