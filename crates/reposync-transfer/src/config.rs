//! Receiver configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration of a [`crate::receiver::TransferReceiver`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Directory under which each transfer gets its staging folder.
    pub staging_root: PathBuf,
    /// Identity of the receiving repository.
    pub local_repository_id: String,
    /// Name of the transfer lock on the target.
    pub lock_name: String,
    /// A lock not refreshed for this long may be taken over.
    pub lock_timeout_ms: u64,
    /// Manifest records processed between progress and cancellation checks.
    pub progress_interval: u64,
    /// Archive deleted source nodes instead of hard-deleting them.
    pub archive_deleted: bool,
    /// Keep the staging folder after the transfer ends.
    pub keep_staging: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            staging_root: PathBuf::from("/var/lib/reposync/staging"),
            local_repository_id: String::from("local"),
            lock_name: String::from("transfer-lock"),
            lock_timeout_ms: 300_000,
            progress_interval: 20,
            archive_deleted: true,
            keep_staging: false,
        }
    }
}

impl ReceiverConfig {
    /// Loads a configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: ReceiverConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: ReceiverConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// A progress interval of zero is treated as one.
    pub fn effective_progress_interval(&self) -> u64 {
        self.progress_interval.max(1)
    }
}
