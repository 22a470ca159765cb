//! Layered configuration: built-in defaults, then the TOML file, then
//! `BWMETER_` environment variables. Command-line flags are applied on top by
//! the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bwmeter_measure::{
    HttpDownloadDefinition, PacketTrainsDefinition, TrafficBudget, TrafficBudgetManager, Unlimited,
};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "BWMETER_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error(transparent)]
    Figment(#[from] figment::Error),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log:           LogConfig,
    pub http_download: HttpDownloadDefinition,
    pub packet_trains: PacketTrainsDefinition,
    pub budget:        BudgetConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive; `RUST_LOG` wins when set.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Traffic allowance. Without `active` nothing is ever refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub active:          bool,
    pub available_bytes: u64,
    pub used_bytes:      u64,
}

impl BudgetConfig {
    pub fn build(&self) -> Arc<dyn TrafficBudget> {
        if !self.active {
            return Arc::new(Unlimited);
        }
        Arc::new(TrafficBudgetManager::new(self.available_bytes).with_used(self.used_bytes))
    }
}

impl Config {
    /// `~/.config/bwmeter/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        home::home_dir().map(|home| home.join(".config").join("bwmeter").join("config.toml"))
    }

    /// Load from `path`, or from the default location if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        match path {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                if let Some(path) = Self::default_path() {
                    figment = figment.merge(Toml::file(path));
                }
            }
        }

        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract()?)
    }
}
