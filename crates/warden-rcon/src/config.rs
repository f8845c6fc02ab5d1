//! `[rcon]` configuration

use serde::Deserialize;
use std::time::Duration;
use warden_core::ServerSettings;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RconConfig {
    /// Defaults to the bind address and port in the game's settings
    pub address: Option<String>,
    /// Defaults to the password in the game's settings
    pub password: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            address: None,
            password: None,
            timeout_secs: 5,
        }
    }
}

impl RconConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Fill unset fields from the game's settings
    pub fn resolve(&self, settings: &ServerSettings) -> (String, String) {
        let address = self
            .address
            .clone()
            .unwrap_or_else(|| settings.rcon_address());
        let password = self
            .password
            .clone()
            .unwrap_or_else(|| settings.rcon_server_password.clone());
        (address, password)
    }
}
