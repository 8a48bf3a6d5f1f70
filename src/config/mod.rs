//! Configuration file for freshgate
//!
//! YAML with one section per component. Every field has a default, so an
//! empty or partial file is valid.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CacheStore, CacheStoreBuilder, store::DEFAULT_MAX_SIZE};
use crate::error::{ConfigError, Error, Result};
use crate::gate::GateConfig;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub gate: GateSettings,

    #[serde(default)]
    pub maintainer: MaintainerSettings,
}

/// Cache store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,

    /// Logical keys mirrored to the durable store
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub persist_keys: Vec<String>,

    /// Per-resource TTLs in milliseconds
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ttl_overrides: BTreeMap<String, u64>,
}

fn default_max_size() -> usize {
    DEFAULT_MAX_SIZE
}

fn default_ttl_ms() -> u64 {
    5 * 60 * 1000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            default_ttl_ms: default_ttl_ms(),
            persist_keys: Vec::new(),
            ttl_overrides: BTreeMap::new(),
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// TTL for a resource family, falling back to the default
    pub fn ttl_for(&self, resource: &str) -> Duration {
        self.ttl_overrides
            .get(resource)
            .map(|ms| Duration::from_millis(*ms))
            .unwrap_or_else(|| self.default_ttl())
    }

    pub fn ttl_overrides(&self) -> HashMap<String, Duration> {
        self.ttl_overrides
            .iter()
            .map(|(resource, ms)| (resource.clone(), Duration::from_millis(*ms)))
            .collect()
    }

    /// Store builder preconfigured from these settings
    pub fn builder(&self) -> CacheStoreBuilder {
        CacheStore::builder()
            .max_size(self.max_size)
            .default_ttl(self.default_ttl())
            .persist_keys(self.persist_keys.iter().cloned())
    }
}

/// Update gate settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSettings {
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    #[serde(default = "default_visibility_delay_ms")]
    pub visibility_delay_ms: u64,

    #[serde(default = "default_focus_delay_ms")]
    pub focus_delay_ms: u64,

    #[serde(default = "default_inactivity_threshold_ms")]
    pub inactivity_threshold_ms: u64,

    #[serde(default = "enabled")]
    pub update_on_visibility: bool,

    #[serde(default = "enabled")]
    pub update_on_focus: bool,
}

fn default_min_interval_ms() -> u64 {
    30_000
}

fn default_visibility_delay_ms() -> u64 {
    1_000
}

fn default_focus_delay_ms() -> u64 {
    500
}

fn default_inactivity_threshold_ms() -> u64 {
    30_000
}

fn enabled() -> bool {
    true
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            visibility_delay_ms: default_visibility_delay_ms(),
            focus_delay_ms: default_focus_delay_ms(),
            inactivity_threshold_ms: default_inactivity_threshold_ms(),
            update_on_visibility: true,
            update_on_focus: true,
        }
    }
}

impl GateSettings {
    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            min_interval: Duration::from_millis(self.min_interval_ms),
            visibility_delay: Duration::from_millis(self.visibility_delay_ms),
            focus_delay: Duration::from_millis(self.focus_delay_ms),
            inactivity_threshold: Duration::from_millis(self.inactivity_threshold_ms),
            update_on_visibility: self.update_on_visibility,
            update_on_focus: self.update_on_focus,
        }
    }
}

/// Background sweep settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintainerSettings {
    #[serde(default = "default_sweep_interval_ms")]
    pub interval_ms: u64,
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

impl Default for MaintainerSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl MaintainerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().ok_or(ConfigError::Invalid(
            "Could not determine config directory".to_string(),
        ))?;

        Ok(dir.join("freshgate").join("config.yaml"))
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound.into());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;
        config.validate()?;

        Ok(config)
    }

    /// Load from `path` (or the default path); a missing file yields defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        match Self::load_from(&path) {
            Err(Error::Config(ConfigError::NotFound)) => Ok(Self::default()),
            other => other,
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path()?)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SaveError(e.to_string()))?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Reject settings the components cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_size == 0 {
            return Err(ConfigError::Invalid("cache.max_size must be at least 1".to_string()).into());
        }
        if self.cache.default_ttl_ms == 0 {
            return Err(
                ConfigError::Invalid("cache.default_ttl_ms must be positive".to_string()).into(),
            );
        }
        if self.maintainer.interval_ms == 0 {
            return Err(
                ConfigError::Invalid("maintainer.interval_ms must be positive".to_string()).into(),
            );
        }
        Ok(())
    }
}
