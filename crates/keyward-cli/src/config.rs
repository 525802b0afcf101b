use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use color_eyre::Result;
use dirs::config_dir;
use keyward_vault::broker::DEFAULT_HELPER_TIMEOUT;
use serde::{Deserialize, Serialize};

/// User-level configuration loaded from `~/.config/keyward/config.toml` (platform-specific).
///
/// The integrity manifest and the PAM directory are intentionally absent: a
/// user-writable file must not be able to point the gates somewhere else.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the credential store directory.
    pub store_dir: Option<PathBuf>,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Path of the privileged helper; defaults to the one installed next to
    /// `keyward`. Must be listed in the integrity manifest.
    pub helper: Option<PathBuf>,
    /// Seconds to wait for authentication plus the helper.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Modules accepted as strong factors in addition to the platform's own.
    #[serde(default)]
    pub extra_strong_factor_modules: Vec<String>,
}

impl Config {
    /// Store directory, falling back to `<config dir>/user_api_keys`.
    pub fn store_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.store_dir {
            return Ok(dir.clone());
        }
        let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
        Ok(base.join("user_api_keys"))
    }

    pub fn helper_timeout(&self) -> Duration {
        self.broker
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HELPER_TIMEOUT)
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("keyward").join("config.toml"))
}

/// Write the given config to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_if_missing(config, &default_path()?)
}

fn write_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}
