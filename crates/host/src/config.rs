//! Host configuration management

use crate::cache::{CacheFormat, TopologyCache};
use anyhow::{Context, Result, anyhow};
use common::MAX_USB_DEVICE_NUM;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub control: ControlSettings,
    /// Which USB notifications the listener subscribes to
    #[serde(default)]
    pub events: EventSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    pub log_level: String,
    /// Upper bound on one enumeration
    #[serde(default = "HostSettings::default_max_devices")]
    pub max_devices: usize,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            max_devices: Self::default_max_devices(),
        }
    }
}

impl HostSettings {
    fn default_max_devices() -> usize {
        MAX_USB_DEVICE_NUM
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Cache file; `~` is expanded
    pub path: String,
    #[serde(default)]
    pub format: CacheFormat,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: "~/.cache/usb-topology/topology.json".to_string(),
            format: CacheFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSettings {
    /// Default control-transfer timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSettings {
    pub attach: bool,
    pub detach: bool,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            attach: true,
            detach: true,
        }
    }
}

impl HostConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-topology/host.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: HostConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-topology").join("host.toml")
        } else {
            PathBuf::from(".config/usb-topology/host.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.host.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.host.log_level,
                valid_levels.join(", ")
            ));
        }

        if !(1..=MAX_USB_DEVICE_NUM).contains(&self.host.max_devices) {
            return Err(anyhow!(
                "Invalid max_devices {}, must be between 1 and {}",
                self.host.max_devices,
                MAX_USB_DEVICE_NUM
            ));
        }

        if self.control.timeout_ms == 0 {
            return Err(anyhow!("Control timeout must be greater than zero"));
        }

        if self.cache.path.trim().is_empty() {
            return Err(anyhow!("Cache path must not be empty"));
        }

        Ok(())
    }

    /// Cache file path with `~` expanded
    pub fn cache_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.cache.path).as_ref())
    }

    pub fn topology_cache(&self) -> TopologyCache {
        TopologyCache::new(self.cache_path(), self.cache.format)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control.timeout_ms)
    }
}
