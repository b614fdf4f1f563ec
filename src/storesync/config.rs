use std::fs;
use std::path::{Path, PathBuf};
use serde::{Serialize, Deserialize};
use crate::error::{StoreError, ErrorCode};

fn default_namespace() -> String {
    "default".to_string()
}

fn default_reconnect_interval() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node id announced to peers
    pub id: String,
    /// Address the relay listens on
    pub addr: String,
    /// Only peers in the same namespace are accepted
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Document backing the store. Each node owns its document; peers keep
    /// their own copy and apply each other's changes to it.
    pub data_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_bytes: Option<usize>,
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,
    /// Re-read `data_path` this often to pick up edits made outside the relay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload_interval_secs: Option<u64>,
    // Must stay the last field: serialized as trailing [[peers]] tables
    #[serde(default)]
    pub peers: Vec<PeerInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: String,
    pub addr: String,
}

impl NodeConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let content = fs::read_to_string(path)
            .map_err(|e| StoreError::new(ErrorCode::ConfigInvalid, format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, StoreError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| StoreError::new(ErrorCode::ConfigInvalid, format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| StoreError::new(ErrorCode::ConfigInvalid, format!("Failed to serialize to TOML: {}", e)))?;

        fs::write(path, content)
            .map_err(|e| StoreError::new(ErrorCode::ConfigInvalid, format!("Failed to write config file: {}", e)))
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.id.trim().is_empty() {
            return Err(StoreError::new(ErrorCode::ConfigInvalid, "Node id must not be empty"));
        }
        if let Some(peer) = self.peers.iter().find(|peer| peer.id == self.id) {
            return Err(StoreError::new(
                ErrorCode::ConfigInvalid,
                format!("Peer {} at {} reuses this node's id", peer.id, peer.addr),
            ));
        }
        if self.reconnect_interval_secs == 0 {
            return Err(StoreError::new(ErrorCode::ConfigInvalid, "reconnect_interval_secs must be positive"));
        }
        if self.reload_interval_secs == Some(0) {
            return Err(StoreError::new(ErrorCode::ConfigInvalid, "reload_interval_secs must be positive"));
        }
        Ok(())
    }
}
