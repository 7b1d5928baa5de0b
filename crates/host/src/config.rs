//! Configuration
//!
//! Loaded from a YAML file, then overridden from environment variables.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Blob storage backend
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// IPFS HTTP API, content addressed
    #[default]
    Ipfs,
    /// Local directory, key addressed
    File,
}

impl FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ipfs" => Ok(Self::Ipfs),
            "file" => Ok(Self::File),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Block production period in seconds
    pub interval: u64,
    /// Maximum transactions per block
    pub max_txs: usize,
    /// Chain publishing period in seconds
    pub send_interval: u64,
    /// Scheduler polling period in milliseconds
    pub poll_millis: u64,
    pub storage_type: StorageType,
    pub ipfs_api_url: String,
    pub blob_dir: PathBuf,
    /// Bound on every blob and contract call
    pub io_timeout_secs: u64,
    /// Also drop pooled transactions when reconciliation finds a gap
    pub clear_pool_on_gap: bool,
    /// Hex private key of the publishing authority, used to countersign
    /// transactions admitted unsigned
    pub signer_key: Option<String>,
    /// Capacity of the committed-block notification queue
    pub externalizer_capacity: usize,
    pub trace_enabled: bool,
    pub trace_path: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            interval: 600,
            max_txs: 128,
            send_interval: 14,
            poll_millis: 1000,
            storage_type: StorageType::Ipfs,
            ipfs_api_url: "http://localhost:5001".to_string(),
            blob_dir: PathBuf::from("./blobs"),
            io_timeout_secs: 30,
            clear_pool_on_gap: false,
            signer_key: None,
            externalizer_capacity: 1024,
            trace_enabled: false,
            trace_path: PathBuf::from("./logs/lifecycle.log"),
        }
    }
}

impl NodeConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_millis)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file, or `:memory:`
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "purchase.db".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractsConfig {
    pub rpc_url: String,
    /// Ledger contract holding the anchored headers
    pub purchase_address: Option<Address>,
    /// Unlocked account that sends the append transactions
    pub publisher_address: Option<Address>,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            purchase_address: None,
            publisher_address: None,
        }
    }
}

/// Node configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub node: NodeConfig,
    pub database: DatabaseConfig,
    pub contracts: ContractsConfig,
}

impl Config {
    /// Read the file if it exists, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!(?path, "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Override settings from environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
            value.trim().parse().map_err(|_| ConfigError::Env { key, value })
        }

        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("NODE_INTERVAL") {
            self.node.interval = parse("NODE_INTERVAL", v)?;
        }
        if let Some(v) = lookup("NODE_MAX_TXS") {
            self.node.max_txs = parse("NODE_MAX_TXS", v)?;
        }
        if let Some(v) = lookup("NODE_SEND_INTERVAL") {
            self.node.send_interval = parse("NODE_SEND_INTERVAL", v)?;
        }
        if let Some(v) = lookup("NODE_STORAGE_TYPE") {
            self.node.storage_type = parse("NODE_STORAGE_TYPE", v)?;
        }
        if let Some(v) = lookup("IPFS_API_URL") {
            self.node.ipfs_api_url = v;
        }
        if let Some(v) = lookup("NODE_SIGNER_KEY") {
            self.node.signer_key = Some(v);
        }
        if let Some(v) = lookup("NODE_TRACE_ENABLED") {
            self.node.trace_enabled = v == "true" || v == "1";
        }
        if let Some(v) = lookup("DATABASE_PATH") {
            self.database.path = v;
        }
        if let Some(v) = lookup("RPC_URL") {
            self.contracts.rpc_url = v;
        }
        if let Some(v) = lookup("PURCHASE_ADDRESS") {
            self.contracts.purchase_address = Some(parse("PURCHASE_ADDRESS", v)?);
        }
        if let Some(v) = lookup("PUBLISHER_ADDRESS") {
            self.contracts.publisher_address = Some(parse("PUBLISHER_ADDRESS", v)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ensure_nonzero = |name: &str, value: u64| {
            if value == 0 {
                Err(ConfigError::Invalid(format!("{name} must be greater than zero")))
            } else {
                Ok(())
            }
        };
        ensure_nonzero("node.interval", self.node.interval)?;
        ensure_nonzero("node.send_interval", self.node.send_interval)?;
        ensure_nonzero("node.max_txs", self.node.max_txs as u64)?;
        ensure_nonzero("node.poll_millis", self.node.poll_millis)?;
        ensure_nonzero("node.io_timeout_secs", self.node.io_timeout_secs)?;
        ensure_nonzero("node.externalizer_capacity", self.node.externalizer_capacity as u64)?;

        if self.node.storage_type == StorageType::Ipfs && self.node.ipfs_api_url.is_empty() {
            return Err(ConfigError::Invalid("node.ipfs_api_url is required for ipfs storage".into()));
        }
        if self.contracts.rpc_url.is_empty() {
            return Err(ConfigError::Invalid("contracts.rpc_url must not be empty".into()));
        }
        if self.contracts.purchase_address == Some(Address::ZERO) {
            return Err(ConfigError::Invalid("contracts.purchase_address must not be zero".into()));
        }
        Ok(())
    }
}
