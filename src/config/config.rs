//! Configuration loading
//!
//! Values come from a TOML file and can be overridden per-field by
//! environment variables, so secrets never need to live on disk.

use crate::auth::{AzureAdAuth, Credentials, DEFAULT_AUTHORITY, DEFAULT_TIMEOUT};
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "D365_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Raw configuration as written in the TOML file
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Token audience; derived from `service_root` when unset
    pub resource_uri: Option<String>,
    pub service_root: Option<String>,
    pub authority: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Validated configuration handed to the client
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub credentials: Credentials,
    pub service_root: String,
    pub authority: String,
    pub timeout: Duration,
}

impl Config {
    /// Load from `$D365_CONFIG` (or `config.toml`) and apply environment overrides
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        Self::load_from(&path, |key| std::env::var(key).ok())
    }

    /// Load `path` if it exists, then apply overrides from `lookup`.
    /// A missing file yields an empty config.
    pub fn load_from<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("No config file at {}, using environment only", path.display());
            Self::default()
        };

        config.apply_overrides(lookup)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `D365_*` overrides; `lookup` maps a variable name to its value
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields = [
            ("D365_TENANT_ID", &mut self.tenant_id),
            ("D365_CLIENT_ID", &mut self.client_id),
            ("D365_CLIENT_SECRET", &mut self.client_secret),
            ("D365_RESOURCE_URI", &mut self.resource_uri),
            ("D365_SERVICE_ROOT", &mut self.service_root),
            ("D365_AUTHORITY", &mut self.authority),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(key) {
                *field = Some(value);
            }
        }

        if let Some(value) = lookup("D365_TIMEOUT_SECS") {
            let secs = value.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "D365_TIMEOUT_SECS",
                message: format!("'{}' is not a whole number of seconds", value),
            })?;
            self.timeout_secs = Some(secs);
        }

        Ok(())
    }

    /// Validate and fill in defaults
    pub fn to_runtime(&self) -> Result<RuntimeConfig, ConfigError> {
        let tenant_id = required(&self.tenant_id, "tenant_id")?;
        let client_id = required(&self.client_id, "client_id")?;
        let client_secret = required(&self.client_secret, "client_secret")?;
        let service_root = required(&self.service_root, "service_root")?;

        if Url::parse(&service_root).is_err() {
            return Err(ConfigError::Invalid {
                key: "service_root",
                message: format!("'{}' is not an absolute URL", service_root),
            });
        }

        let resource_uri = match non_blank(&self.resource_uri) {
            Some(uri) => uri,
            None => AzureAdAuth::resource_from_endpoint(&service_root),
        };

        let timeout = match self.timeout_secs {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    key: "timeout_secs",
                    message: "must be greater than zero".to_string(),
                })
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TIMEOUT,
        };

        Ok(RuntimeConfig {
            credentials: Credentials::new(tenant_id, client_id, client_secret, resource_uri),
            service_root,
            authority: non_blank(&self.authority).unwrap_or_else(|| DEFAULT_AUTHORITY.to_string()),
            timeout,
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn required(value: &Option<String>, key: &'static str) -> Result<String, ConfigError> {
    non_blank(value).ok_or(ConfigError::Missing(key))
}
