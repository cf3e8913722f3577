//! Application configuration management.
//!
//! Configuration is read from `~/.config/dspquery/config.json` (when
//! present) and then overridden by environment variables:
//! - `DSP_BACKEND_URL`: backend base address; unset or empty means same-origin
//! - `DSP_ORIGIN`: the application origin, also used to scope storage
//! - `DSP_STORAGE`: `file`, `keyring` or `memory`
//! - `DSP_REQUEST_TIMEOUT_SECS`: HTTP timeout

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/storage directory paths
pub const APP_NAME: &str = "dspquery";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Origin assumed when none is configured
const DEFAULT_ORIGIN: &str = "http://localhost:3000";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const ENV_BACKEND_URL: &str = "DSP_BACKEND_URL";
pub const ENV_ORIGIN: &str = "DSP_ORIGIN";
pub const ENV_STORAGE: &str = "DSP_STORAGE";
pub const ENV_REQUEST_TIMEOUT: &str = "DSP_REQUEST_TIMEOUT_SECS";

/// Where the credential is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON file in the per-origin data directory
    #[default]
    File,
    /// OS keychain
    Keyring,
    /// Process memory only
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StorageBackend::File),
            "keyring" | "keychain" => Ok(StorageBackend::Keyring),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend_url: Option<String>,
    pub origin: String,
    pub storage: StorageBackend,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: None,
            origin: DEFAULT_ORIGIN.to_string(),
            storage: StorageBackend::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load the config file, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Defaults overridden by the environment only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_BACKEND_URL) {
            self.backend_url = Some(url);
        }
        if let Ok(origin) = std::env::var(ENV_ORIGIN) {
            if !origin.trim().is_empty() {
                self.origin = origin;
            }
        }
        if let Ok(storage) = std::env::var(ENV_STORAGE) {
            match storage.parse() {
                Ok(backend) => self.storage = backend,
                Err(e) => warn!(error = %e, "Ignoring {}", ENV_STORAGE),
            }
        }
        if let Ok(timeout) = std::env::var(ENV_REQUEST_TIMEOUT) {
            match timeout.trim().parse() {
                Ok(secs) => self.request_timeout_secs = secs,
                Err(e) => warn!(error = %e, "Ignoring {}", ENV_REQUEST_TIMEOUT),
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Base address for API requests: the backend URL, or the application
    /// origin (same-origin) when no backend is configured.
    pub fn base_url(&self) -> String {
        let base = self
            .backend_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(self.origin.as_str());
        base.trim_end_matches('/').to_string()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Per-origin directory for file storage
    pub fn storage_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(origin_slug(&self.origin)))
    }
}

/// Directory-safe name for an origin, e.g. `http_localhost_3000`
pub fn origin_slug(origin: &str) -> String {
    let slug: String = origin
        .trim()
        .trim_end_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();

    let mut collapsed = String::with_capacity(slug.len());
    for c in slug.chars() {
        if c == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed.trim_matches('_').to_string()
}
