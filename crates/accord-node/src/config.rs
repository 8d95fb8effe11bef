use std::net::SocketAddr;
use std::path::PathBuf;

use accord_consensus::EngineConfig;
use accord_core::{GenesisConfig, KeyPair, PublicKey};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Node configuration, loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node data directory
    pub data_dir: PathBuf,

    /// HTTP bind address
    pub http_addr: SocketAddr,

    /// Consensus engine configuration
    pub engine: EngineConfig,

    /// Accountable node id this validator produces blocks under
    pub producer_id: String,

    /// Validator private key (hex) - absent for observer nodes
    pub validator_key: Option<String>,

    /// Genesis configuration
    pub genesis: GenesisConfigFile,

    /// Validator peer endpoints
    pub peers: Vec<PeerEndpointConfig>,

    /// Governance signers authorized to approve accountable-node
    /// applications, and the required threshold
    pub admission: AdmissionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfigFile {
    pub timestamp: u64,
    pub validators: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEndpointConfig {
    pub pubkey: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    pub signature_threshold_m: usize,
    pub authorized_signers: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            data_dir: PathBuf::from("./accord-data"),
            http_addr: "127.0.0.1:8080".parse().expect("static addr"),
            engine: EngineConfig::default(),
            producer_id: String::new(),
            validator_key: None,
            genesis: GenesisConfigFile {
                timestamp: 0,
                validators: vec![],
            },
            peers: Vec::new(),
            admission: AdmissionConfig {
                signature_threshold_m: 2,
                authorized_signers: vec![],
            },
        }
    }
}

impl NodeConfig {
    /// Load config from file
    pub fn load(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &PathBuf) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Convert genesis config to core type
    pub fn to_genesis_config(&self) -> Result<GenesisConfig> {
        let validators: Result<Vec<PublicKey>, _> = self
            .genesis
            .validators
            .iter()
            .map(|s| PublicKey::from_hex(s).map_err(|e| anyhow::anyhow!(e)))
            .collect();

        Ok(GenesisConfig {
            chain_id: self.engine.chain_id,
            timestamp: self.genesis.timestamp,
            validators: validators?,
        })
    }

    pub fn authorized_signers(&self) -> Result<Vec<PublicKey>> {
        self.admission
            .authorized_signers
            .iter()
            .map(|s| PublicKey::from_hex(s).map_err(|e| anyhow::anyhow!(e)))
            .collect()
    }
}

/// Generate a single-validator devnet configuration with fresh keys
pub fn generate_sample_config() -> NodeConfig {
    let validator = KeyPair::generate();
    let officer = KeyPair::generate();

    NodeConfig {
        data_dir: PathBuf::from("./accord-data"),
        http_addr: "127.0.0.1:8080".parse().expect("static addr"),
        engine: EngineConfig {
            active_set_size: 1,
            ..Default::default()
        },
        producer_id: "dev-producer".to_string(),
        validator_key: Some(validator.secret.to_hex()),
        genesis: GenesisConfigFile {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            validators: vec![validator.public.to_hex()],
        },
        peers: Vec::new(),
        admission: AdmissionConfig {
            signature_threshold_m: 1,
            authorized_signers: vec![officer.public.to_hex()],
        },
    }
}
