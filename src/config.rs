use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use crate::errors::{ErrorKind, Result};
use crate::logging::LogConfig;
use crate::transfer::SpeedMode;

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    /// Origin of the file server, e.g. `http://127.0.0.1:8000`
    pub base_url: String,
    pub api_prefix: String,
    pub max_search_results: usize,
    /// Key-value fallback for the last viewed directory
    pub state_file: Option<PathBuf>,
    pub transfer: TransferConfig,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            api_prefix: "/api".to_string(),
            max_search_results: 100,
            state_file: None,
            transfer: TransferConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Config> {
        let config_str = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Config> {
        Ok(toml::from_str(config_str)?)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TransferConfig {
    /// Hard deadline for one transfer
    pub timeout_secs: u64,
    pub speed_mode: SpeedMode,
    pub banner_on: BannerPolicy,
    pub banner_ttl_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300, // 5 minutes
            speed_mode: SpeedMode::default(),
            banner_on: BannerPolicy::default(),
            banner_ttl_secs: 5,
        }
    }
}

impl TransferConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn banner_ttl(&self) -> Duration {
        Duration::from_secs(self.banner_ttl_secs)
    }
}

/// Error kinds that raise a transient banner on top of the task's own
/// error state.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct BannerPolicy(HashSet<ErrorKind>);

impl BannerPolicy {
    pub fn new(kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self(kinds.into_iter().collect())
    }

    pub fn none() -> Self {
        Self(HashSet::new())
    }

    pub fn should_banner(&self, kind: ErrorKind) -> bool {
        self.0.contains(&kind)
    }
}

impl Default for BannerPolicy {
    fn default() -> Self {
        Self::new([ErrorKind::Timeout])
    }
}
