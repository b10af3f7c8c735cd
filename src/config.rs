//! Service configuration.
//!
//! This module holds the backend base URLs, the path prefixes the request
//! pipeline rewrites, the storage keys for the persisted token and user
//! record, and the refresh lead time.
//!
//! Configuration is stored at `~/.config/finboard/services.json`; missing
//! fields fall back to the defaults below.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config/storage directory paths
const APP_NAME: &str = "finboard";

/// Config file name
const CONFIG_FILE: &str = "services.json";

/// Seconds before absolute expiry at which the refresh timer fires.
/// One minute leaves room for a slow refresh round trip without ever
/// racing the expiry itself.
const DEFAULT_REFRESH_LEAD_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL for the authentication service (login/refresh/logout).
    pub auth_base_url: String,
    /// Base URL for the main resource API.
    pub api_base_url: String,
    /// Relative-path prefix routed to the auth service.
    pub auth_prefix: String,
    /// Relative-path prefix routed to the main API.
    pub api_prefix: String,
    /// Locale sent with every request.
    pub accept_language: String,
    /// Storage key holding the serialized credential.
    pub token_key: String,
    /// Storage key holding the serialized user record.
    pub user_key: String,
    /// Seconds before expiry at which a silent refresh is requested.
    pub refresh_lead_secs: i64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            auth_base_url: "https://auth.finboard.app".to_string(),
            api_base_url: "https://api.finboard.app".to_string(),
            auth_prefix: "/auth".to_string(),
            api_prefix: "/api".to_string(),
            accept_language: "en-US".to_string(),
            token_key: "app-token".to_string(),
            user_key: "app-user".to_string(),
            refresh_lead_secs: DEFAULT_REFRESH_LEAD_SECS,
        }
    }
}

impl ServiceConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
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

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the durable storage tier.
    pub fn storage_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Route of the sign-in view, used by the 401 handler.
    pub fn login_route(&self) -> String {
        format!("{}/login", self.auth_prefix)
    }
}
