//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the backend address, request timeouts, the credential
//! backend, and the last email used to log in.
//!
//! Configuration is stored at `~/.config/mano-dashboard/config.json`.
//! `MANO_API_URL` overrides the stored backend address for one run
//! without being written back.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::client::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::auth::{
    CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore,
    RevocableCredentialStore,
};
use crate::query::DEFAULT_QUERY_TIMEOUT_SECS;

/// Application name used for config/data directory paths
const APP_NAME: &str = "mano-dashboard";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Backend address used when neither config nor environment names one
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Environment variable overriding the backend address
pub const API_URL_ENV: &str = "MANO_API_URL";

/// Where the credential is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub query_timeout_secs: Option<u64>,
    #[serde(default)]
    pub credential_backend: CredentialBackend,
    pub last_email: Option<String>,

    #[serde(skip)]
    base_url_override: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `MANO_API_URL` (if set and non-empty) for this process only.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = std::env::var(API_URL_ENV).ok().filter(|url| !url.trim().is_empty()) {
            self.override_base_url(url);
        }
        self
    }

    fn override_base_url(&mut self, url: impl Into<String>) {
        self.base_url_override = Some(url.into());
    }

    /// Resolved backend address: override, then config, then the default.
    pub fn base_url(&self) -> String {
        self.base_url_override
            .clone()
            .or_else(|| self.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    /// Zero counts as unset.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .filter(|&secs| secs > 0)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    /// Zero counts as unset.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(
            self.query_timeout_secs
                .filter(|&secs| secs > 0)
                .unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS),
        )
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for durable client state (credential file, logs).
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Build the configured credential store, wrapped so a failed clear
    /// still withdraws the token from the transport.
    ///
    /// Without a data directory the file backend degrades to an in-memory
    /// store: the client stays usable, the session just won't survive a
    /// restart.
    pub fn credential_store(&self) -> Arc<dyn CredentialStore> {
        let backend: Box<dyn CredentialStore> = match self.credential_backend {
            CredentialBackend::Keyring => Box::new(KeyringCredentialStore::new()),
            CredentialBackend::File => match self.data_dir() {
                Ok(dir) => Box::new(FileCredentialStore::new(dir)),
                Err(e) => {
                    warn!(error = %e, "No data directory, credentials will not persist");
                    Box::new(MemoryCredentialStore::new())
                }
            },
        };
        Arc::new(RevocableCredentialStore::new(backend))
    }
}
