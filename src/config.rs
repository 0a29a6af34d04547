//! Filesystem configuration
//!
//! One JSON file per filesystem instance. Default location: `~/.sftp-fs/config.json`
//! on macOS/Linux, `%APPDATA%\sftp-fs\config.json` on Windows.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::sftp::error::SftpError;
use crate::sftp::location::Location;
use crate::sftp::types::constants::DEFAULT_CHUNK_SIZE;
use crate::ssh::SshConfig;

/// Current config file version
pub const CONFIG_VERSION: u32 = 1;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

/// Get the configuration directory
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("sftp-fs"));
        }
        dirs::home_dir()
            .map(|home| home.join(".sftp-fs"))
            .ok_or(ConfigError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".sftp-fs"))
            .ok_or(ConfigError::NoConfigDir)
    }
}

/// Default config file path
pub fn config_file() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json"))
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

/// Everything needed to mount one remote tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Display name of the filesystem
    pub name: String,
    /// Root of the tree: an absolute remote path, or a full `sftp://` location
    pub root: String,
    pub connection: SshConfig,
    /// Initial transfer chunk size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
}

impl FsConfig {
    pub fn new(name: impl Into<String>, root: impl Into<String>, connection: SshConfig) -> Self {
        Self {
            version: CONFIG_VERSION,
            name: name.into(),
            root: root.into(),
            connection,
            chunk_size: None,
        }
    }

    /// Root location; bare paths are taken relative to the configured host
    pub fn root_location(&self) -> Result<Location, SftpError> {
        if self.root.starts_with("sftp://") {
            return Location::parse(&self.root).map(|l| l.with_dir(true));
        }
        Ok(Location::remote(
            self.connection.host.clone(),
            Some(self.connection.port),
            Some(self.connection.username.clone()),
            &self.root,
            true,
        ))
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    /// Load from `path`
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).await?;
        let config: Self = serde_json::from_str(&contents)?;
        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                found: config.version,
                supported: CONFIG_VERSION,
            });
        }
        Ok(config)
    }

    /// Load from the default location
    pub async fn load_default() -> Result<Self, ConfigError> {
        Self::load(config_file()?).await
    }

    /// Save to `path`
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to temp file first, then rename (atomic write)
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, path).await?;
        tracing::debug!("Saved config to {}", path.display());
        Ok(())
    }
}
