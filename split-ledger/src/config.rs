//! Configuration for the ledger server

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Address the transport layer binds to
    pub listen_addr: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Sync reconciler configuration
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/split-ledger"),
            service_name: "split-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            listen_addr: "0.0.0.0:8080".to_string(),
            rocksdb: RocksDBConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 16,
            max_write_buffer_number: 2,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Sync reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Largest batch accepted in one request
    pub max_batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { max_batch_size: 50 }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("SPLIT_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(addr) = std::env::var("SPLIT_LEDGER_LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        if let Ok(batch) = std::env::var("SPLIT_LEDGER_SYNC_MAX_BATCH") {
            config.sync.max_batch_size = batch.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid SPLIT_LEDGER_SYNC_MAX_BATCH: {}", e))
            })?;
        }

        Ok(config)
    }
}
