//! Supervisor configuration

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::process::ProcessConfig;

/// How to run the game server
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server executable
    pub executable: PathBuf,
    /// Working directory, defaults to the executable's directory
    pub working_dir: Option<PathBuf>,
    pub args: Vec<String>,
    /// Game configuration file written before every start
    pub settings_path: PathBuf,
    pub kill_timeout_secs: u64,
    pub restart_delay_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("linux/starbound_server"),
            working_dir: None,
            args: Vec::new(),
            settings_path: PathBuf::from("storage/starbound_server.config"),
            kill_timeout_secs: 10,
            restart_delay_secs: 5,
        }
    }
}

impl ServerConfig {
    pub fn process(&self) -> ProcessConfig {
        let working_dir = self.working_dir.clone().or_else(|| {
            self.executable
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
        });
        ProcessConfig {
            executable: self.executable.clone(),
            working_dir,
            args: self.args.clone(),
            kill_timeout: Duration::from_secs(self.kill_timeout_secs),
        }
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }
}

/// Connection tracking and name rules
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionsConfig {
    /// Kick players only discovered by a listing
    pub kick_unnoticed: bool,
    pub refresh_interval_secs: u64,
    /// How long a login waits for its connect line
    pub pending_ttl_secs: u64,
    pub max_pending: usize,
    pub illegal_characters: Vec<char>,
    /// Name only `privileged_account` may use
    pub reserved_name: Option<String>,
    pub privileged_account: Option<String>,
    /// CIDR ranges of known VPN providers
    pub vpn_ranges: Vec<String>,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            kick_unnoticed: true,
            refresh_interval_secs: 60,
            pending_ttl_secs: 60,
            max_pending: 64,
            illegal_characters: vec!['<', '>', '(', ')'],
            reserved_name: None,
            privileged_account: None,
            vpn_ranges: Vec::new(),
        }
    }
}

impl ConnectionsConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }
}

/// One enabled monitor
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorEntry {
    /// Catalog key
    pub key: String,
    /// Overrides the monitor's own priority
    #[serde(default)]
    pub priority: Option<i32>,
    /// Monitor specific settings
    #[serde(default)]
    pub settings: toml::Table,
}

impl MonitorEntry {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            priority: None,
            settings: toml::Table::new(),
        }
    }
}

/// Monitors enabled when the configuration lists none
pub fn default_monitors() -> Vec<MonitorEntry> {
    [
        "connections",
        "log",
        "uptime",
        "spam",
        "segfault",
        "world_thread",
        "invalid_coordinate",
        "race",
        "vpn",
        "disagreement",
    ]
    .into_iter()
    .map(MonitorEntry::new)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_config_working_dir() {
        let config = ServerConfig {
            executable: PathBuf::from("/opt/sb/linux/starbound_server"),
            ..Default::default()
        };
        let process = config.process();
        assert_eq!(process.working_dir, Some(PathBuf::from("/opt/sb/linux")));
        assert_eq!(process.kill_timeout, Duration::from_secs(10));

        let bare = ServerConfig {
            executable: PathBuf::from("starbound_server"),
            ..Default::default()
        };
        assert_eq!(bare.process().working_dir, None);
    }

    #[test]
    fn test_monitor_entry_from_toml() {
        let entry: MonitorEntry = toml::from_str(
            r#"
            key = "spam"
            priority = 5
            [settings]
            threshold = 4
            "#,
        )
        .unwrap();
        assert_eq!(entry.key, "spam");
        assert_eq!(entry.priority, Some(5));
        assert_eq!(entry.settings["threshold"].as_integer(), Some(4));
    }

    #[test]
    fn test_connections_defaults() {
        let config: ConnectionsConfig = toml::from_str("kick_unnoticed = false").unwrap();
        assert!(!config.kick_unnoticed);
        assert_eq!(config.illegal_characters, vec!['<', '>', '(', ')']);
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
    }
}
