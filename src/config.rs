//! Repository configuration, loaded/saved as TOML.
//!
//! Mirrors the `load_path_mappings`/`save_path_mappings` TOML round-trip
//! already used elsewhere in this codebase, generalized into one typed
//! config struct for the whole repository.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_max_connections() -> u32 {
    10
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_stream_hash_timeout_secs() -> u64 {
    30
}

fn default_stream_hash_max_bytes() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Repository-wide tunables, matching spec §5 (concurrency/resource model)
/// and §4.3.4 (catalog pragmas).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_stream_hash_timeout_secs")]
    pub stream_hash_timeout_secs: u64,

    #[serde(default = "default_stream_hash_max_bytes")]
    pub stream_hash_max_bytes: u64,

    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// 32-byte encryption key, hex-encoded. Present only when path
    /// encryption + blind index search is enabled for this repository.
    #[serde(default)]
    pub encryption_key_hex: Option<String>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
            stream_hash_timeout_secs: default_stream_hash_timeout_secs(),
            stream_hash_max_bytes: default_stream_hash_max_bytes(),
            worker_threads: default_worker_threads(),
            encryption_key_hex: None,
        }
    }
}

impl RepoConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Decode the configured encryption key, if any. Zeroized on drop by the
    /// caller via `zeroize::Zeroizing` wrapping.
    pub fn encryption_key(&self) -> crate::Result<Option<[u8; 32]>> {
        match &self.encryption_key_hex {
            None => Ok(None),
            Some(hex_str) => {
                let bytes = hex::decode(hex_str).map_err(|e| crate::Error::Configuration {
                    reason: format!("invalid encryption_key_hex: {e}"),
                })?;
                let key: [u8; 32] = bytes.try_into().map_err(|_| crate::Error::Configuration {
                    reason: "encryption key must be exactly 32 bytes".to_string(),
                })?;
                Ok(Some(key))
            }
        }
    }
}
