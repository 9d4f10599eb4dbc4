use crate::error::{Result, ZsyncError};
use crate::transport::Credentials;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Settings from `config.toml`; every key is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub http: HttpConfig,

    /// Basic auth credentials by host name
    pub credentials: HashMap<String, Credentials>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub connect_timeout_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(DEFAULT_CONNECT_TIMEOUT_SECS),
            timeout_secs: Some(DEFAULT_TIMEOUT_SECS),
            user_agent: format!("zsync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Load from the default location; a missing file yields defaults
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            tracing::debug!("No config file at {}", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ZsyncError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| ZsyncError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(
            "Loaded config from {} ({} credential entries)",
            path.display(),
            config.credentials.len()
        );
        Ok(config)
    }

    /// `<config dir>/zsync/config.toml`
    pub fn config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| ZsyncError::Config("cannot determine config directory".to_string()))?;
        Ok(dir.join("zsync").join("config.toml"))
    }
}
