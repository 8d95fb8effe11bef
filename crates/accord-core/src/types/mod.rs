pub mod block;
pub mod transaction;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use block::{Approval, Block, BlockHeader, BlockIndex, CommitCertificate, GenesisConfig};
pub use transaction::Transaction;

/// Identifier of an accountable (block-producing) node. Validators are
/// identified by their public key; accountable nodes carry an operator-chosen
/// id that also appears in storage paths and block indexes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
