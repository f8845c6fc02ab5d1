//! Game server configuration file model
//!
//! Only the keys the supervisor reads or writes are typed. Everything else in
//! the file is carried through untouched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ban::Ban;

/// The game server's JSON configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub server_name: String,
    pub max_players: u32,
    pub allow_anonymous_connections: bool,
    pub allow_assets_mismatch: bool,
    pub game_server_bind: String,
    pub game_server_port: u16,
    pub run_query_server: bool,
    pub query_server_bind: String,
    pub query_server_port: u16,
    pub run_rcon_server: bool,
    pub rcon_server_bind: String,
    pub rcon_server_port: u16,
    pub rcon_server_password: String,
    #[serde(rename = "bannedIPs")]
    pub banned_ips: Vec<String>,
    pub banned_uuids: Vec<String>,
    /// Keys not modelled above
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            server_name: "A Starbound Server".to_string(),
            max_players: 8,
            allow_anonymous_connections: true,
            allow_assets_mismatch: true,
            game_server_bind: "*".to_string(),
            game_server_port: 21025,
            run_query_server: false,
            query_server_bind: "*".to_string(),
            query_server_port: 21025,
            run_rcon_server: false,
            rcon_server_bind: "*".to_string(),
            rcon_server_port: 21026,
            rcon_server_password: String::new(),
            banned_ips: Vec::new(),
            banned_uuids: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl ServerSettings {
    /// Replace the ban lists with the addresses and UUIDs of active bans
    pub fn apply_bans<'a>(&mut self, bans: impl IntoIterator<Item = &'a Ban>) {
        let now = chrono::Utc::now();
        let mut ips = BTreeSet::new();
        let mut uuids = BTreeSet::new();
        for ban in bans.into_iter().filter(|ban| !ban.is_expired(now)) {
            if let Some(ip) = ban.ip.as_deref().filter(|ip| !ip.is_empty()) {
                ips.insert(strip_port(ip).to_string());
            }
            if let Some(uuid) = ban.uuid.as_deref().filter(|uuid| !uuid.is_empty()) {
                uuids.insert(uuid.to_string());
            }
        }
        self.banned_ips = ips.into_iter().collect();
        self.banned_uuids = uuids.into_iter().collect();
    }

    /// Address to reach the query server on from this host
    pub fn query_address(&self) -> String {
        format!("{}:{}", local_host(&self.query_server_bind), self.query_server_port)
    }

    /// Address to reach the RCON server on from this host
    pub fn rcon_address(&self) -> String {
        format!("{}:{}", local_host(&self.rcon_server_bind), self.rcon_server_port)
    }
}

fn local_host(bind: &str) -> &str {
    let bind = bind.trim();
    if bind.is_empty() || bind == "*" || bind == "localhost" {
        "127.0.0.1"
    } else {
        bind
    }
}

fn strip_port(address: &str) -> &str {
    match crate::ban::parse_address(address) {
        Some(_) if address.parse::<std::net::IpAddr>().is_ok() => address,
        Some(_) => address
            .rsplit_once(':')
            .map(|(host, _)| host.trim_start_matches('[').trim_end_matches(']'))
            .unwrap_or(address),
        None => address,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_preserves_unknown_keys() {
        let json = r#"{
            "serverName": "Test",
            "maxPlayers": 16,
            "allowAnonymousConnections": false,
            "bannedIPs": ["1.1.1.1"],
            "safeScripts": true,
            "serverOverrideSpawnWorld": { "a": 1 }
        }"#;
        let settings: ServerSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.server_name, "Test");
        assert_eq!(settings.max_players, 16);
        assert!(!settings.allow_anonymous_connections);
        assert_eq!(settings.banned_ips, vec!["1.1.1.1".to_string()]);
        assert_eq!(settings.game_server_port, 21025);
        assert!(settings.extra.contains_key("safeScripts"));

        let out = serde_json::to_value(&settings).unwrap();
        assert_eq!(out["safeScripts"], serde_json::json!(true));
        assert_eq!(out["serverOverrideSpawnWorld"]["a"], serde_json::json!(1));
        assert_eq!(out["bannedIPs"][0], serde_json::json!("1.1.1.1"));
    }

    #[test]
    fn test_apply_bans() {
        let bans = vec![
            Ban::new(Some("10.0.0.1:4000".into()), Some("uuid-a".into()), "x", "m"),
            Ban::new(Some("10.0.0.1".into()), None, "x", "m"),
            Ban::new(None, Some("uuid-b".into()), "x", "m"),
            Ban::new(Some("10.0.0.9".into()), None, "x", "m")
                .with_duration(chrono::Duration::seconds(-5)),
        ];
        let mut settings = ServerSettings::default();
        settings.apply_bans(&bans);
        assert_eq!(settings.banned_ips, vec!["10.0.0.1".to_string()]);
        assert_eq!(
            settings.banned_uuids,
            vec!["uuid-a".to_string(), "uuid-b".to_string()]
        );
    }

    #[test]
    fn test_query_address() {
        let mut settings = ServerSettings::default();
        assert_eq!(settings.query_address(), "127.0.0.1:21025");
        settings.query_server_bind = "192.168.1.5".to_string();
        settings.query_server_port = 21030;
        assert_eq!(settings.query_address(), "192.168.1.5:21030");
        assert_eq!(settings.rcon_address(), "127.0.0.1:21026");
    }
}
