//! Connection screening by address
//!
//! Runs after the connections monitor has admitted a player from its
//! connect line, so the registry already carries the address and VPN flag.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::info;
use warden_core::ban::parse_address;
use warden_core::{ConnectionId, Level, Message, Player, Result, WardenError};

use crate::connections::Connections;
use crate::monitor::{Monitor, MonitorContext, Verdict};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VpnConfig {
    pub allow_vpn: bool,
    pub allow_anonymous_vpn: bool,
    pub no_address_reason: String,
    pub anonymous_vpn_reason: String,
    pub ipv6_reason: String,
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            allow_vpn: true,
            allow_anonymous_vpn: false,
            no_address_reason: "Malformed connection.".to_string(),
            anonymous_vpn_reason: "Invalid connection.".to_string(),
            ipv6_reason: "IPv6 is not supported on this platform.".to_string(),
        }
    }
}

/// Why a connection was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    NoAddress,
    AnonymousVpn,
    AnonymousIpv6,
}

impl VpnConfig {
    /// Screen a freshly admitted player
    pub fn screen(&self, player: &Player) -> Option<Refusal> {
        let Some(ip) = player.ip.as_deref().map(str::trim).filter(|ip| !ip.is_empty()) else {
            return Some(Refusal::NoAddress);
        };

        if player.is_vpn && (!self.allow_vpn || (!self.allow_anonymous_vpn && player.is_anonymous())) {
            return Some(Refusal::AnonymousVpn);
        }

        let ipv6 = matches!(parse_address(ip), Some(IpAddr::V6(_)));
        if ipv6 && player.is_anonymous() {
            return Some(Refusal::AnonymousIpv6);
        }
        None
    }

    fn reason(&self, refusal: Refusal) -> &str {
        match refusal {
            Refusal::NoAddress => &self.no_address_reason,
            Refusal::AnonymousVpn => &self.anonymous_vpn_reason,
            Refusal::AnonymousIpv6 => &self.ipv6_reason,
        }
    }
}

pub struct VpnMonitor {
    connections: Arc<Connections>,
    config: VpnConfig,
    connected: Regex,
}

impl VpnMonitor {
    pub fn new(ctx: &MonitorContext, config: VpnConfig) -> Result<Self> {
        let connected = Regex::new(r"^UniverseServer: Client '.*' <(\d+)> \([^)]*\) connected$")
            .map_err(|e| WardenError::Config(format!("Invalid connect pattern: {}", e)))?;
        Ok(Self {
            connections: ctx.connections.clone(),
            config,
            connected,
        })
    }

    async fn check(&self, connection: ConnectionId) -> Result<()> {
        let Some(player) = self.connections.registry().get(connection).await else {
            return Ok(());
        };
        if let Some(refusal) = self.config.screen(&player) {
            info!("Kicking {} ({}): {:?}", player.username, connection, refusal);
            self.connections
                .kick(connection, self.config.reason(refusal))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Monitor for VpnMonitor {
    fn name(&self) -> &str {
        "vpn"
    }

    async fn handle_message(&mut self, message: &Message) -> Verdict {
        if message.level != Level::Info {
            return Verdict::Continue;
        }
        let Some(id) = self
            .connected
            .captures(&message.content)
            .and_then(|c| c[1].parse::<ConnectionId>().ok())
        else {
            return Verdict::Continue;
        };
        self.check(id).await.into()
    }
}
