//! Configuration management
//!
//! Tuning knobs for discovery and the notification pipeline. Values load
//! from a TOML file and every field has a sensible default, so a missing
//! or partial file still yields a working configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Peer discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Notification pipeline settings
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Peer discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Maximum number of ranked candidates returned per request
    #[serde(default = "default_discovery_limit")]
    pub limit: usize,
}

fn default_discovery_limit() -> usize {
    10
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            limit: default_discovery_limit(),
        }
    }
}

/// Notification pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Minimum minutes before the same (observer, session, type) key may
    /// trigger another notification
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
    /// Hours during which presence notifications for the same session are
    /// merged instead of duplicated
    #[serde(default = "default_grouping_hours")]
    pub grouping_hours: i64,
    /// Seconds between best-effort sweeps of live sessions
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Hours until a presence notification expires from the inbox
    #[serde(default = "default_presence_ttl_hours")]
    pub presence_ttl_hours: i64,
}

fn default_cooldown_minutes() -> i64 {
    30
}

fn default_grouping_hours() -> i64 {
    24
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_presence_ttl_hours() -> i64 {
    48
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: default_cooldown_minutes(),
            grouping_hours: default_grouping_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
            presence_ttl_hours: default_presence_ttl_hours(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("failed to create config directory")?;
        }
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Cooldown window as a chrono duration
    pub fn cooldown_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.notifications.cooldown_minutes)
    }

    /// Grouping window as a chrono duration
    pub fn grouping_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.notifications.grouping_hours)
    }

    /// Presence notification time-to-live as a chrono duration
    pub fn presence_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.notifications.presence_ttl_hours)
    }
}
