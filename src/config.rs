use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{ConvertError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Cap on the total size of one upload request, in megabytes.
    pub max_upload_mb: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding per-job scratch files and archives.
    pub data_dir: String,
    pub archive_ttl_minutes: u64,
    pub sweep_interval_minutes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8088,
            max_upload_mb: 500,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "uploads".to_string(),
            archive_ttl_minutes: 60,
            sweep_interval_minutes: 10,
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            ConvertError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content).map_err(|e| {
            ConvertError::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.server.max_upload_mb as usize * 1024 * 1024
    }
}
