//! Layered configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an
//! optional TOML file, and `TROVE_`-prefixed environment variables where
//! `__` separates nested keys (`TROVE_PERSISTENCE__DEBOUNCE_MS=100`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "TROVE_";
const APPLICATION: &str = "trove";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of every disk cache.
    pub cache_dir: PathBuf,
    /// Screen density used to pick module resource variants.
    pub device_density: f64,
    pub downloader: DownloaderConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// How long a downloaded item stays pinned in memory after its last use.
    pub memory_ttl_secs: u64,
    /// Treat module archives as uncompressed.
    pub decompression_disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub debounce_ms: u64,
    /// `0` means unbounded.
    pub max_weight: u64,
    pub batch_writes_disabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            device_density: 1.0,
            downloader: DownloaderConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            memory_ttl_secs: 30,
            decompression_disabled: false,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            max_weight: 0,
            batch_writes_disabled: false,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    match ProjectDirs::from("", "", APPLICATION) {
        Some(dirs) => dirs.cache_dir().to_path_buf(),
        None => std::env::temp_dir().join(APPLICATION),
    }
}

impl Config {
    /// Defaults, then `file` when given, then the environment.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_figment(&Self::figment(file))
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(cache_dir = %config.cache_dir.display(), device_density = config.device_density, "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.device_density.is_finite() || self.device_density <= 0.0 {
            exn::bail!(ErrorKind::InvalidConfig(format!(
                "device_density must be a positive number, got {}",
                self.device_density
            )));
        }
        if self.cache_dir.as_os_str().is_empty() {
            exn::bail!(ErrorKind::InvalidConfig("cache_dir must not be empty".to_string()));
        }
        if self.persistence.debounce_ms == 0 && !self.persistence.batch_writes_disabled {
            exn::bail!(ErrorKind::InvalidConfig(
                "persistence.debounce_ms must be positive while batching writes".to_string()
            ));
        }
        Ok(())
    }

    pub fn memory_ttl(&self) -> Duration {
        Duration::from_secs(self.downloader.memory_ttl_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.persistence.debounce_ms)
    }
}
