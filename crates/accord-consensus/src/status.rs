use serde::{Deserialize, Serialize};

/// Engine phase. Always reported honestly in status, STOPPED included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnginePhase {
    Idle,
    Proposing,
    CollectingApprovals,
    Committing,
    Syncing,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeRole {
    Coordinator,
    Validator,
    Observer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShadowRole {
    Shadow1,
    Shadow2,
}

/// Chain head as reported in status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipInfo {
    pub block_count: u64,
    pub hash: String,
}

/// Read-only snapshot of the engine. Derived on demand, never authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub phase: EnginePhase,
    pub tip: Option<TipInfo>,
    pub epoch: u64,
    pub slot: u64,
    pub role: NodeRole,
    pub shadow_role: Option<ShadowRole>,
    pub peers: usize,
    pub tx_pool_size: usize,
    pub is_accountable: bool,
    pub has_valid_deposit: bool,
    pub is_whitelisted: bool,
    pub active_set_size: usize,
    pub total_pool_size: usize,
    pub blocks_proposed: u64,
    pub blocks_validated: u64,
    pub last_block_time: Option<u64>,
}
