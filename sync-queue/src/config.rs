//! Configuration for the client queue

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Queue and sync-pass configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Pending + failed items accepted before enqueue is refused
    pub max_queue_size: usize,

    /// Waiting count at which enqueue starts warning
    pub warn_queue_size: usize,

    /// Items sent per round trip
    pub batch_size: usize,

    /// Failed attempts before an item is dead-lettered
    pub max_retries: u32,

    /// Refresh interval for the advisory pending count (seconds)
    pub pending_refresh_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/sync-queue"),
            max_queue_size: 500,
            warn_queue_size: 400,
            batch_size: 50,
            max_retries: 5,
            pending_refresh_secs: 5,
        }
    }
}

impl QueueConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: QueueConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = QueueConfig::default();

        if let Ok(data_dir) = std::env::var("SYNC_QUEUE_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(size) = std::env::var("SYNC_QUEUE_MAX_SIZE") {
            config.max_queue_size = size
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid SYNC_QUEUE_MAX_SIZE: {}", e)))?;
        }

        if let Ok(retries) = std::env::var("SYNC_QUEUE_MAX_RETRIES") {
            config.max_retries = retries.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid SYNC_QUEUE_MAX_RETRIES: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 {
            return Err(crate::Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.max_retries == 0 {
            return Err(crate::Error::Config("max_retries must be at least 1".to_string()));
        }
        if self.warn_queue_size > self.max_queue_size {
            return Err(crate::Error::Config(format!(
                "warn_queue_size {} exceeds max_queue_size {}",
                self.warn_queue_size, self.max_queue_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.max_queue_size, 500);
        assert_eq!(config.warn_queue_size, 400);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_retries, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.toml");
        std::fs::write(&path, "batch_size = 10\n").unwrap();

        let config = QueueConfig::from_file(&path).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_queue_size, 500);
    }

    #[test]
    fn test_rejects_warn_above_max() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.toml");
        std::fs::write(&path, "max_queue_size = 10\nwarn_queue_size = 20\n").unwrap();

        assert!(matches!(
            QueueConfig::from_file(&path).unwrap_err(),
            crate::Error::Config(_)
        ));
    }
}
