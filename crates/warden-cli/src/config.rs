//! `warden.toml`

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::warn;
use warden_rcon::RconConfig;
use warden_server::{ConnectionsConfig, MonitorEntry, ServerConfig, default_monitors};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub server: ServerConfig,
    pub rcon: RconConfig,
    pub connections: ConnectionsConfig,
    /// Enabled monitors, in `[[monitors]]` tables
    pub monitors: Vec<MonitorEntry>,
    /// Accounts with administrator rights
    pub admins: Vec<String>,
    pub log_level: String,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            rcon: RconConfig::default(),
            connections: ConnectionsConfig::default(),
            monitors: Vec::new(),
            admins: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl WardenConfig {
    /// Read the configuration file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Monitors to build, falling back to the default set
    pub fn monitors(&self) -> Vec<MonitorEntry> {
        if self.monitors.is_empty() {
            default_monitors()
        } else {
            self.monitors.clone()
        }
    }
}
