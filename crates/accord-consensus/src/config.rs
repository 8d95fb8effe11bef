use accord_core::PublicKey;
use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;

/// Protocol constants. Values are wire-compatible and must not change.
pub mod constants {
    /// Practical active validator set per epoch
    pub const DEFAULT_ACTIVE_SET_SIZE: usize = 7;
    /// 2/3 + 1 for BFT
    pub const DEFAULT_QUORUM_THRESHOLD: f64 = 0.67;
    pub const MIN_VALIDATORS: usize = 2;
    /// D >= 2 x TV
    pub const DEPOSIT_MULTIPLIER: u64 = 2;
    pub const MIN_ATTESTED_ASSETS: u64 = 5_000_000;

    pub const INSTANT_MODE_TIMEOUT_MS: u64 = 500;
    pub const EPOCH_MODE_SLOT_MS: u64 = 2000;
    pub const MAX_CLOCK_DRIFT_MS: u64 = 500;
    pub const SHADOW_DELAY_1_MS: u64 = 150;
    pub const SHADOW_DELAY_2_MS: u64 = 300;

    pub const TOPIC_POC_PROPOSAL: &str = "poc/proposal";
    pub const TOPIC_POC_APPROVAL: &str = "poc/approval";
    pub const TOPIC_POC_COMMIT: &str = "poc/commit";
    pub const TOPIC_TX: &str = "mempool/tx";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
}

/// Block production trigger. Shadow fallback is orthogonal and controlled
/// by `shadow_validators_enabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockMode {
    /// Create a block when a transaction arrives
    Instant,
    /// Create blocks on the predetermined slot schedule
    Epoch,
}

/// Development-only toggles. Refused outright on mainnet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevOptions {
    pub enable_unsafe_ops: bool,
    pub skip_deposit_check: bool,
    pub skip_accountability_check: bool,
    pub force_coordinator: Option<PublicKey>,
}

impl DevOptions {
    pub fn any_enabled(&self) -> bool {
        self.enable_unsafe_ops
            || self.skip_deposit_check
            || self.skip_accountability_check
            || self.force_coordinator.is_some()
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub chain_id: u64,
    pub network: Network,

    // Timing
    pub slot_ms: u64,
    pub epoch_length_slots: u64,
    pub instant_timeout_ms: u64,
    pub max_clock_drift_ms: u64,
    pub shadow_delay_1_ms: u64,
    pub shadow_delay_2_ms: u64,

    // Validator configuration
    pub active_set_size: usize,
    pub total_validator_pool_size: usize,
    pub quorum_threshold: f64,

    // Block limits
    pub max_block_bytes: usize,
    pub max_block_txs: usize,

    // Modes
    pub block_mode: BlockMode,
    pub shadow_validators_enabled: bool,

    // Protocol parameters
    pub deposit_multiplier: u64,
    pub finality_depth: u64,

    /// Halt proposing while the transport reports unhealthy
    pub strict_transport: bool,

    #[serde(default)]
    pub dev: DevOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            chain_id: 1,
            network: Network::Devnet,
            slot_ms: constants::EPOCH_MODE_SLOT_MS,
            epoch_length_slots: 32,
            instant_timeout_ms: constants::INSTANT_MODE_TIMEOUT_MS,
            max_clock_drift_ms: constants::MAX_CLOCK_DRIFT_MS,
            shadow_delay_1_ms: constants::SHADOW_DELAY_1_MS,
            shadow_delay_2_ms: constants::SHADOW_DELAY_2_MS,
            active_set_size: constants::DEFAULT_ACTIVE_SET_SIZE,
            total_validator_pool_size: 300,
            quorum_threshold: constants::DEFAULT_QUORUM_THRESHOLD,
            max_block_bytes: 1024 * 1024,
            max_block_txs: 1000,
            block_mode: BlockMode::Instant,
            shadow_validators_enabled: true,
            deposit_multiplier: constants::DEPOSIT_MULTIPLIER,
            finality_depth: 16,
            strict_transport: false,
            dev: DevOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot run under. A failure here is
    /// fatal: the caller transitions to STOPPED rather than limping along.
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.chain_id == 0 {
            return Err(ConsensusError::InvalidConfig(
                "chain_id must be non-zero".to_string(),
            ));
        }
        if self.slot_ms == 0 || self.epoch_length_slots == 0 {
            return Err(ConsensusError::InvalidConfig(
                "slot_ms and epoch_length_slots must be non-zero".to_string(),
            ));
        }
        if self.active_set_size == 0 {
            return Err(ConsensusError::InvalidConfig(
                "active_set_size must be at least 1".to_string(),
            ));
        }
        if !(self.quorum_threshold > 0.0 && self.quorum_threshold <= 1.0) {
            return Err(ConsensusError::InvalidConfig(format!(
                "quorum_threshold {} outside (0, 1]",
                self.quorum_threshold
            )));
        }
        if self.max_block_txs == 0 || self.max_block_bytes == 0 {
            return Err(ConsensusError::InvalidConfig(
                "block limits must be non-zero".to_string(),
            ));
        }
        if self.network == Network::Mainnet && self.dev.any_enabled() {
            return Err(ConsensusError::InvalidConfig(
                "dev toggles are not permitted on mainnet".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_canonical_constants() {
        assert_eq!(constants::DEFAULT_ACTIVE_SET_SIZE, 7);
        assert_eq!(constants::DEFAULT_QUORUM_THRESHOLD, 0.67);
        assert_eq!(constants::DEPOSIT_MULTIPLIER, 2);
        assert_eq!(constants::MIN_VALIDATORS, 2);
        assert_eq!(constants::MIN_ATTESTED_ASSETS, 5_000_000);
        assert_eq!(constants::INSTANT_MODE_TIMEOUT_MS, 500);
        assert_eq!(constants::EPOCH_MODE_SLOT_MS, 2000);
        assert_eq!(constants::MAX_CLOCK_DRIFT_MS, 500);
        assert_eq!(constants::SHADOW_DELAY_1_MS, 150);
        assert_eq!(constants::SHADOW_DELAY_2_MS, 300);
        assert_eq!(constants::TOPIC_POC_PROPOSAL, "poc/proposal");
        assert_eq!(constants::TOPIC_POC_APPROVAL, "poc/approval");
        assert_eq!(constants::TOPIC_POC_COMMIT, "poc/commit");
        assert_eq!(constants::TOPIC_TX, "mempool/tx");
    }

    #[test]
    fn test_zero_chain_id_rejected() {
        let config = EngineConfig {
            chain_id: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConsensusError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_dev_toggles_rejected_on_mainnet() {
        let config = EngineConfig {
            network: Network::Mainnet,
            dev: DevOptions {
                skip_deposit_check: true,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConsensusError::InvalidConfig(_))
        ));

        // Clean mainnet config is fine
        let clean = EngineConfig {
            network: Network::Mainnet,
            ..Default::default()
        };
        clean.validate().unwrap();
    }

    #[test]
    fn test_bad_quorum_threshold_rejected() {
        for threshold in [0.0, -0.5, 1.5] {
            let config = EngineConfig {
                quorum_threshold: threshold,
                ..Default::default()
            };
            assert!(config.validate().is_err());
        }
    }
}
