//! Typed construction of storage keys.
//!
//! Every key written by the engine is built here; the prefix strings are
//! wire/storage-compatible constants and ad-hoc string concatenation of
//! keys elsewhere is a bug. Numeric path segments are zero-padded so that
//! byte order equals numeric order under prefix scans.

use accord_core::{Hash, NodeId, PublicKey};

mod ns {
    pub const BLOCK_INDEX: &str = "bidx/";
    pub const BLOCK_DATA: &str = "blk/";
    pub const BLOCK_COUNT_INDEX: &str = "bcnt/";
    pub const META_TIP: &str = "meta/tiphash";
    pub const META_BLOCK_COUNT: &str = "meta/blockcount";
    pub const VALIDATOR_BASE: &str = "validator/";
    pub const ACNODE_BASE: &str = "acnode/";
    pub const WHITELIST: &str = "poc/whitelist/";
    pub const BLACKLIST: &str = "poc/blacklist/";
    pub const DEPOSITS: &str = "poc/deposits/";
    pub const UNDO: &str = "undo/";
    pub const PUBLISHED: &str = "pub/";
    pub const COMMIT_CERT: &str = "cmt/";
}

fn pad20(n: u64) -> String {
    format!("{:020}", n)
}

fn pad6(n: u32) -> String {
    format!("{:06}", n)
}

/// An opaque storage key. Obtainable only through the constructors below.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StoreKey(Vec<u8>);

impl StoreKey {
    fn from_string(s: String) -> Self {
        StoreKey(s.into_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    // Blocks & chain metadata

    /// `blk/<blockHash>` -> raw block bytes
    pub fn block_data(hash: &Hash) -> Self {
        Self::from_string(format!("{}{}", ns::BLOCK_DATA, hash.to_hex()))
    }

    /// `bidx/<blockHash>` -> block index record
    pub fn block_index(hash: &Hash) -> Self {
        Self::from_string(format!("{}{}", ns::BLOCK_INDEX, hash.to_hex()))
    }

    /// `bcnt/<blockCount>` -> block hash (reverse index)
    pub fn block_count_index(block_count: u64) -> Self {
        Self::from_string(format!("{}{}", ns::BLOCK_COUNT_INDEX, pad20(block_count)))
    }

    /// `meta/tiphash` -> current chain tip hash
    pub fn meta_tip() -> Self {
        Self::from_string(ns::META_TIP.to_string())
    }

    /// `meta/blockcount` -> total number of blocks
    pub fn meta_block_count() -> Self {
        Self::from_string(ns::META_BLOCK_COUNT.to_string())
    }

    // Registries

    /// `validator/<vid>/data` -> validator record
    pub fn validator_data(validator: &PublicKey) -> Self {
        Self::from_string(format!("{}{}/data", ns::VALIDATOR_BASE, validator.to_hex()))
    }

    /// `validator/list` -> ordered list of registered validator ids
    pub fn validator_list() -> Self {
        Self::from_string(format!("{}list", ns::VALIDATOR_BASE))
    }

    /// `acnode/data/<nodeId>` -> accountable node record
    pub fn acnode_data(node: &NodeId) -> Self {
        Self::from_string(format!("{}data/{}", ns::ACNODE_BASE, node.as_str()))
    }

    /// `acnode/list/active` -> ids of currently active accountable nodes
    pub fn acnode_active_list() -> Self {
        Self::from_string(format!("{}list/active", ns::ACNODE_BASE))
    }

    /// `acnode/event/<eventId>/<nodeId>` -> slashing case / lifecycle event
    pub fn acnode_event(event_id: &str, node: &NodeId) -> Self {
        Self::from_string(format!(
            "{}event/{}/{}",
            ns::ACNODE_BASE,
            event_id,
            node.as_str()
        ))
    }

    /// Scan prefix for all accountable-node events
    pub fn acnode_event_prefix() -> Self {
        Self::from_string(format!("{}event/", ns::ACNODE_BASE))
    }

    // PoC bookkeeping

    /// `poc/whitelist/<nodeId>` -> whitelist entry
    pub fn whitelist(id: &str) -> Self {
        Self::from_string(format!("{}{}", ns::WHITELIST, id))
    }

    /// `poc/blacklist/<nodeId>` -> blacklist entry
    pub fn blacklist(id: &str) -> Self {
        Self::from_string(format!("{}{}", ns::BLACKLIST, id))
    }

    /// `poc/deposits/<nodeId>` -> deposit record
    pub fn deposit(id: &str) -> Self {
        Self::from_string(format!("{}{}", ns::DEPOSITS, id))
    }

    // Synchronizer: undo journal & markers

    /// `undo/<blockCount>/<blockHash>/<seq>` -> pre-image of one mutation
    pub fn undo_entry(block_count: u64, hash: &Hash, seq: u32) -> Self {
        Self::from_string(format!(
            "{}{}/{}/{}",
            ns::UNDO,
            pad20(block_count),
            hash.to_hex(),
            pad6(seq)
        ))
    }

    /// Scan prefix for all undo entries of one block
    pub fn undo_block_prefix(block_count: u64, hash: &Hash) -> Self {
        Self::from_string(format!("{}{}/{}/", ns::UNDO, pad20(block_count), hash.to_hex()))
    }

    /// Scan prefix for the whole undo journal
    pub fn undo_prefix() -> Self {
        Self::from_string(ns::UNDO.to_string())
    }

    /// `pub/<blockHash>` -> published marker (commit timestamp)
    pub fn published_marker(hash: &Hash) -> Self {
        Self::from_string(format!("{}{}", ns::PUBLISHED, hash.to_hex()))
    }

    /// `cmt/<blockHash>` -> archived commit certificate
    pub fn commit_certificate(hash: &Hash) -> Self {
        Self::from_string(format!("{}{}", ns::COMMIT_CERT, hash.to_hex()))
    }
}

impl AsRef<[u8]> for StoreKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_prefixes() {
        let hash = Hash::ZERO;
        let zeros = "0".repeat(64);

        assert_eq!(
            String::from_utf8(StoreKey::block_data(&hash).into_bytes()).unwrap(),
            format!("blk/{zeros}")
        );
        assert_eq!(
            String::from_utf8(StoreKey::block_index(&hash).into_bytes()).unwrap(),
            format!("bidx/{zeros}")
        );
        assert_eq!(
            String::from_utf8(StoreKey::meta_tip().into_bytes()).unwrap(),
            "meta/tiphash"
        );
        assert_eq!(
            String::from_utf8(StoreKey::meta_block_count().into_bytes()).unwrap(),
            "meta/blockcount"
        );
        assert_eq!(
            String::from_utf8(StoreKey::published_marker(&hash).into_bytes()).unwrap(),
            format!("pub/{zeros}")
        );
    }

    #[test]
    fn test_registry_key_shapes() {
        let validator = PublicKey([0xab; 32]);
        let key = String::from_utf8(StoreKey::validator_data(&validator).into_bytes()).unwrap();
        assert!(key.starts_with("validator/"));
        assert!(key.ends_with("/data"));

        let node = NodeId::new("acme");
        assert_eq!(
            String::from_utf8(StoreKey::acnode_data(&node).into_bytes()).unwrap(),
            "acnode/data/acme"
        );
        assert_eq!(
            String::from_utf8(StoreKey::whitelist("acme").into_bytes()).unwrap(),
            "poc/whitelist/acme"
        );
        assert_eq!(
            String::from_utf8(StoreKey::deposit("acme").into_bytes()).unwrap(),
            "poc/deposits/acme"
        );
    }

    #[test]
    fn test_undo_keys_sort_numerically() {
        let hash = Hash::ZERO;
        let a = StoreKey::undo_entry(9, &hash, 999_999);
        let b = StoreKey::undo_entry(10, &hash, 0);
        assert!(a < b);

        let s1 = StoreKey::undo_entry(5, &hash, 1);
        let s2 = StoreKey::undo_entry(5, &hash, 2);
        assert!(s1 < s2);
    }

    #[test]
    fn test_block_count_index_sorts_numerically() {
        let a = StoreKey::block_count_index(99);
        let b = StoreKey::block_count_index(100);
        assert!(a < b);
    }
}
