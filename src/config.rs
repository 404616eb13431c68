use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::storage::StoreConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BarbellConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Requests running longer are abandoned and their transaction rolled back
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Reject requests without a valid bearer credential
    pub required: bool,
    pub tokens: Vec<TokenEntry>,
}

/// A known bearer credential, stored as its SHA-256 hex digest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token_sha256: String,
    pub subject_id: String,
    pub email: String,
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("barbell.toml")
}

/// Load configuration; a missing file yields defaults. `PORT` overrides the port.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<BarbellConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(&path)?;
        toml::from_str(&contents)?
    } else {
        tracing::debug!("No config at {}, using defaults", path.display());
        BarbellConfig::default()
    };

    if let Ok(port) = std::env::var("PORT") {
        config.server.port = port
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid PORT value: {}", port))?;
    }

    Ok(config)
}

pub fn write_config(path: &Path, config: &BarbellConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}
