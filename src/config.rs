//! Configuration module for the IPFS endpoint and the local image store

use crate::error::{GantryError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_IPFS_API: &str = "http://127.0.0.1:5001";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsConfig {
    pub api_url: String,
    pub timeout_secs: u64,
    pub pin: bool,
    pub cid_version: u8,
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_IPFS_API.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            pin: true,
            cid_version: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub ipfs: IpfsConfig,
    pub store: StoreConfig,
}

impl AppConfig {
    /// Defaults overlaid with `GANTRY_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = AppConfig::default();

        if let Ok(api) = env::var("GANTRY_IPFS_API") {
            config.ipfs.api_url = api;
        }
        if let Ok(timeout) = env::var("GANTRY_IPFS_TIMEOUT") {
            config.ipfs.timeout_secs = timeout.parse().map_err(|_| {
                GantryError::Validation(format!("GANTRY_IPFS_TIMEOUT is not a number: {}", timeout))
            })?;
        }
        if let Ok(pin) = env::var("GANTRY_IPFS_PIN") {
            config.ipfs.pin = parse_bool(&pin);
        }
        if let Ok(version) = env::var("GANTRY_CID_VERSION") {
            config.ipfs.cid_version = version.parse().map_err(|_| {
                GantryError::Validation(format!("GANTRY_CID_VERSION is not a number: {}", version))
            })?;
        }
        if let Ok(root) = env::var("GANTRY_STORE") {
            config.store.root = PathBuf::from(root);
        }

        Ok(config)
    }

    /// Apply command-line overrides on top of the loaded values
    pub fn with_overrides(
        mut self,
        api_url: Option<String>,
        store_root: Option<PathBuf>,
        timeout_secs: Option<u64>,
    ) -> Self {
        if let Some(api_url) = api_url {
            self.ipfs.api_url = api_url;
        }
        if let Some(root) = store_root {
            self.store.root = root;
        }
        if let Some(timeout) = timeout_secs {
            self.ipfs.timeout_secs = timeout;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.ipfs.api_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(GantryError::Validation(
                "IPFS API URL must start with http:// or https://".to_string(),
            ));
        }
        if self.ipfs.timeout_secs == 0 {
            return Err(GantryError::Validation("Timeout must be greater than 0".to_string()));
        }
        if self.ipfs.cid_version > 1 {
            return Err(GantryError::Validation(format!(
                "CID version must be 0 or 1, got {}",
                self.ipfs.cid_version
            )));
        }
        if self.store.root.as_os_str().is_empty() {
            return Err(GantryError::Validation("Store root cannot be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn default_store_root() -> PathBuf {
    if let Ok(root) = env::var("GANTRY_STORE") {
        return PathBuf::from(root);
    }
    if let Ok(data) = env::var("XDG_DATA_HOME") {
        if !data.is_empty() {
            return PathBuf::from(data).join("gantry").join("storage");
        }
    }
    if let Ok(home) = env::var("HOME") {
        if !home.is_empty() {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("gantry")
                .join("storage");
        }
    }
    PathBuf::from(".gantry").join("storage")
}
