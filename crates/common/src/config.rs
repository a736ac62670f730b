use std::path::Path;
use std::time::Duration;
use std::{fs, io};

use serde::{Deserialize, Serialize};

use crate::identity::Did;

pub const CONFIG_FILE_NAME: &str = "iridium.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncNodeConfig {
    pub label: String,
    pub did: Did,
}

/// Limits enforced by a [`SyncAgent`](crate::sync::SyncAgent), per peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Payloads held for one peer before `sync-put` is rejected
    #[serde(default = "default_sync_limit")]
    pub queue_limit: usize,
    /// Pins held for one peer before `pin` is rejected
    #[serde(default = "default_sync_limit")]
    pub pin_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_limit: default_sync_limit(),
            pin_limit: default_sync_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IridiumConfig {
    /// Link expansion depth when resolving the root document
    #[serde(default = "default_load_depth")]
    pub load_depth: usize,
    /// Deadline for every provider call
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
    /// Poll interval for bounded retries
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// How long a disconnected peer keeps its channel
    #[serde(default = "default_peer_grace_ms")]
    pub peer_grace_ms: u64,
    /// Membership changes within this window share one header update
    #[serde(default = "default_namespace_debounce_ms")]
    pub namespace_debounce_ms: u64,
    #[serde(default)]
    pub followed_peers: Vec<Did>,
    #[serde(default)]
    pub sync_nodes: Vec<SyncNodeConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_load_depth() -> usize {
    2
}

fn default_provider_timeout_ms() -> u64 {
    10_000
}

fn default_retry_interval_ms() -> u64 {
    250
}

fn default_peer_grace_ms() -> u64 {
    30_000
}

fn default_namespace_debounce_ms() -> u64 {
    1_000
}

fn default_sync_limit() -> usize {
    10_000
}

impl Default for IridiumConfig {
    fn default() -> Self {
        Self {
            load_depth: default_load_depth(),
            provider_timeout_ms: default_provider_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            peer_grace_ms: default_peer_grace_ms(),
            namespace_debounce_ms: default_namespace_debounce_ms(),
            followed_peers: Vec::new(),
            sync_nodes: Vec::new(),
            sync: SyncConfig::default(),
        }
    }
}

impl IridiumConfig {
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml(&fs::read_to_string(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn peer_grace(&self) -> Duration {
        Duration::from_millis(self.peer_grace_ms)
    }

    pub fn namespace_debounce(&self) -> Duration {
        Duration::from_millis(self.namespace_debounce_ms)
    }
}
