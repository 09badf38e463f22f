use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;
use ts_rs::TS;

pub const CONFIG_VERSION: &str = "v1";
pub const DEFAULT_DEBIAN_USERNAME_HEADER: &str = "x-dacs-username";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SsoProvider {
    Github,
    Debian,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, TS)]
pub struct GitHubSsoConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, TS)]
pub struct DebianSsoConfig {
    /// Request header the authenticating proxy fills with the Debian username.
    pub username_header: String,
}

impl Default for DebianSsoConfig {
    fn default() -> Self {
        Self {
            username_header: DEFAULT_DEBIAN_USERNAME_HEADER.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, TS)]
pub struct Config {
    pub config_version: String,
    #[serde(default)]
    pub sso: Vec<SsoProvider>,
    #[serde(default)]
    pub github: GitHubSsoConfig,
    #[serde(default)]
    pub debian: DebianSsoConfig,
    #[serde(default)]
    pub registration_open: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION.to_string(),
            sso: Vec::new(),
            github: GitHubSsoConfig::default(),
            debian: DebianSsoConfig::default(),
            registration_open: false,
        }
    }
}

impl Config {
    pub fn sso_enabled(&self, provider: SsoProvider) -> bool {
        self.sso.contains(&provider)
    }

    /// Overlay settings from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("WAFER_SSO") {
            self.sso = raw
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .filter_map(|name| match name.parse::<SsoProvider>() {
                    Ok(provider) => Some(provider),
                    Err(_) => {
                        tracing::warn!("Ignoring unknown SSO provider {:?}", name);
                        None
                    }
                })
                .collect();
        }
        if let Some(client_id) = lookup("WAFER_GITHUB_CLIENT_ID") {
            self.github.client_id = Some(client_id);
        }
        if let Some(secret) = lookup("WAFER_GITHUB_CLIENT_SECRET") {
            self.github.client_secret = Some(secret);
        }
        if let Some(header) = lookup("WAFER_DEBIAN_USERNAME_HEADER") {
            self.debian.username_header = header.to_ascii_lowercase();
        }
        if let Some(raw) = lookup("WAFER_REGISTRATION_OPEN") {
            self.registration_open = matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sso_enabled(SsoProvider::Github)
            && (self.github.client_id.is_none() || self.github.client_secret.is_none())
        {
            return Err(ConfigError::ValidationError(
                "GitHub SSO is enabled without a client id and secret".to_string(),
            ));
        }
        if self.debian.username_header.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Debian SSO username header must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<String> for Config {
    fn from(raw_config: String) -> Self {
        match serde_json::from_str::<Config>(&raw_config) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Config parse failed: {}, using default", e);
                Self::default()
            }
        }
    }
}

/// Read the config file, falling back to defaults when it is missing or unreadable.
pub async fn load_config_from_file(config_path: &PathBuf) -> Config {
    match tokio::fs::read_to_string(config_path).await {
        Ok(raw_config) => Config::from(raw_config),
        Err(_) => {
            tracing::info!("No config file found at {}, creating one", config_path.display());
            Config::default()
        }
    }
}

pub async fn save_config_to_file(config: &Config, config_path: &Path) -> Result<(), ConfigError> {
    let raw_config = serde_json::to_string_pretty(config)?;
    tokio::fs::write(config_path, raw_config).await?;
    Ok(())
}
