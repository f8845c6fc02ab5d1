//! Connection management on top of the registry
//!
//! Owns the paths that need both the registry and the command channel:
//! reconciliation against the server's listing, name enforcement and kicks.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use warden_core::{BanType, ConnectionId, Player, Result, WardenError};

use crate::collaborators::{CommandClient, EventSink, Store};
use crate::config::ConnectionsConfig;
use crate::events::names;
use crate::registry::{ConnectionRegistry, Reconciliation};
use crate::vpn::VpnRanges;

pub const ILLEGAL_NAME_REASON: &str = "Character name contains illegal characters or strings.";
pub const DUPLICATE_NAME_REASON: &str = "Character with the same name already exists on the server.";
pub const UNNOTICED_REASON: &str = "Connection established without notice. Please try connecting again.";

/// Why a name was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameViolation {
    IllegalCharacters,
    Impersonation,
    Duplicate,
}

impl NameViolation {
    pub fn reason(self) -> &'static str {
        match self {
            NameViolation::IllegalCharacters | NameViolation::Impersonation => ILLEGAL_NAME_REASON,
            NameViolation::Duplicate => DUPLICATE_NAME_REASON,
        }
    }
}

/// Rules every character name must satisfy
#[derive(Debug, Clone)]
pub struct NamePolicy {
    pub illegal_characters: Vec<char>,
    pub reserved_name: Option<String>,
    pub privileged_account: Option<String>,
}

impl NamePolicy {
    pub fn from_config(config: &ConnectionsConfig) -> Self {
        Self {
            illegal_characters: config.illegal_characters.clone(),
            reserved_name: config.reserved_name.clone(),
            privileged_account: config.privileged_account.clone(),
        }
    }

    /// Check a player against the policy and the other connected players
    pub fn check(&self, player: &Player, others: &[Player]) -> Option<NameViolation> {
        let names = std::iter::once(player.username.as_str()).chain(player.nickname.as_deref());
        for name in names {
            if name.chars().any(|c| self.illegal_characters.contains(&c)) {
                return Some(NameViolation::IllegalCharacters);
            }
        }

        if let Some(reserved) = self.reserved_name.as_deref().filter(|r| !r.is_empty()) {
            let uses_reserved = player.username.contains(reserved);
            let privileged = match (&player.account, &self.privileged_account) {
                (Some(account), Some(privileged)) => account.eq_ignore_ascii_case(privileged),
                _ => false,
            };
            if uses_reserved && !privileged {
                return Some(NameViolation::Impersonation);
            }
        }

        let duplicate = others.iter().any(|other| {
            other.connection_id != player.connection_id
                && other.username == player.username
        });
        if duplicate {
            return Some(NameViolation::Duplicate);
        }

        None
    }
}

impl Default for NamePolicy {
    fn default() -> Self {
        Self::from_config(&ConnectionsConfig::default())
    }
}

/// Registry plus the side effects that keep it honest
pub struct Connections {
    registry: Arc<ConnectionRegistry>,
    commands: Arc<dyn CommandClient>,
    store: Arc<dyn Store>,
    sink: Arc<dyn EventSink>,
    policy: NamePolicy,
    vpn: VpnRanges,
    kick_unnoticed: bool,
    refresh_interval: Duration,
    refresh_lock: Mutex<()>,
}

impl Connections {
    pub fn new(
        config: &ConnectionsConfig,
        commands: Arc<dyn CommandClient>,
        store: Arc<dyn Store>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        Ok(Self {
            registry: Arc::new(ConnectionRegistry::new(
                config.pending_ttl(),
                config.max_pending,
            )),
            commands,
            store,
            sink,
            policy: NamePolicy::from_config(config),
            vpn: VpnRanges::parse(&config.vpn_ranges)?,
            kick_unnoticed: config.kick_unnoticed,
            refresh_interval: config.refresh_interval(),
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn commands(&self) -> &Arc<dyn CommandClient> {
        &self.commands
    }

    /// How often the listing is reconciled while the server runs
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Fill in admin and VPN flags for a new player, then enforce names
    pub async fn admit(&self, player: Player) -> Result<Player> {
        let is_admin = match &player.account {
            Some(account) => self.store.is_admin(account).await.unwrap_or_else(|e| {
                warn!("Could not look up account {}: {}", account, e);
                false
            }),
            None => false,
        };
        let is_vpn = player.ip.as_deref().is_some_and(|ip| self.vpn.contains(ip));

        let player = if is_admin != player.is_admin || is_vpn != player.is_vpn {
            self.registry
                .update(player.connection_id, |p| {
                    p.is_admin = is_admin;
                    p.is_vpn = is_vpn;
                })
                .await
                .unwrap_or(player)
        } else {
            player
        };

        if player.is_vpn {
            info!("Player {} connected through a known VPN range", player.username);
        }

        self.enforce_name(&player).await?;
        Ok(player)
    }

    /// Kick the player if its name breaks the policy. Returns whether it was kicked.
    pub async fn enforce_name(&self, player: &Player) -> Result<bool> {
        let others = self.registry.others(player).await;
        match self.policy.check(player, &others) {
            Some(violation) => {
                warn!(
                    "Player {} ({}) violates name policy: {:?}",
                    player.username, player.connection_id, violation
                );
                self.kick(player.connection_id, violation.reason()).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Kick a connected player
    pub async fn kick(&self, connection: ConnectionId, reason: &str) -> Result<()> {
        if self.registry.get(connection).await.is_none() {
            return Err(WardenError::NotConnected(connection));
        }

        let response = self.commands.kick(connection, reason).await?;
        if !response.success {
            return Err(WardenError::Command(format!(
                "Kick of {} rejected: {}",
                connection, response.message
            )));
        }

        info!("Kicked {}: {}", connection, reason);
        self.sink.publish(
            names::KICK,
            serde_json::json!({ "connection": connection, "reason": reason }),
        );
        Ok(())
    }

    /// Kick a connected player and keep them out for a while
    pub async fn kick_for(&self, connection: ConnectionId, reason: &str, duration: Duration) -> Result<()> {
        if self.registry.get(connection).await.is_none() {
            return Err(WardenError::NotConnected(connection));
        }

        let response = self
            .commands
            .ban(connection, reason, BanType::Ip, duration)
            .await?;
        if !response.success {
            return Err(WardenError::Command(format!(
                "Timed kick of {} rejected: {}",
                connection, response.message
            )));
        }

        info!("Kicked {} for {:?}: {}", connection, duration, reason);
        self.sink.publish(
            names::KICK,
            serde_json::json!({
                "connection": connection,
                "reason": reason,
                "duration": duration.as_secs(),
            }),
        );
        Ok(())
    }

    /// Reconcile the registry with the server's own player listing
    pub async fn refresh_listing(&self) -> Result<Reconciliation> {
        let _refreshing = self.refresh_lock.lock().await;
        let since = self.registry.generation().await;
        let listing = self.commands.list().await?;
        let result = self.registry.reconcile(&listing, since).await;
        if !result.is_empty() {
            debug!(
                "Listing reconciled: {} added, {} removed, {} updated",
                result.added.len(),
                result.removed.len(),
                result.updated.len()
            );
        }

        for player in &result.added {
            if self.kick_unnoticed {
                warn!(
                    "Player {} ({}) connected without notice",
                    player.username, player.connection_id
                );
                if let Err(e) = self.kick(player.connection_id, UNNOTICED_REASON).await {
                    error!("Failed to kick unnoticed player {}: {}", player.connection_id, e);
                }
            } else if let Err(e) = self.admit(player.clone()).await {
                error!("Failed to admit {}: {}", player.connection_id, e);
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connect, listed, test_connections};

    #[test]
    fn test_policy_illegal_characters() {
        let policy = NamePolicy::default();
        assert_eq!(
            policy.check(&Player::new(1, "<Server>"), &[]),
            Some(NameViolation::IllegalCharacters)
        );
        let mut nick = Player::new(1, "Bob");
        nick.nickname = Some("(admin)".to_string());
        assert_eq!(policy.check(&nick, &[]), Some(NameViolation::IllegalCharacters));
        assert_eq!(policy.check(&Player::new(1, "Bob"), &[]), None);
    }

    #[test]
    fn test_policy_reserved_name() {
        let policy = NamePolicy {
            reserved_name: Some("Warden".to_string()),
            privileged_account: Some("owner".to_string()),
            ..NamePolicy::default()
        };
        let mut impostor = Player::new(1, "TheWarden");
        assert_eq!(policy.check(&impostor, &[]), Some(NameViolation::Impersonation));

        impostor.account = Some("Owner".to_string());
        assert_eq!(policy.check(&impostor, &[]), None);

        // Matching is case-sensitive on the name
        assert_eq!(policy.check(&Player::new(2, "thewarden"), &[]), None);
    }

    #[test]
    fn test_policy_duplicate() {
        let policy = NamePolicy::default();
        let first = Player::new(1, "Admin");
        let second = Player::new(2, "Admin");
        assert_eq!(
            policy.check(&second, std::slice::from_ref(&first)),
            Some(NameViolation::Duplicate)
        );
        assert_eq!(policy.check(&first, &[first.clone()]), None);

        let other_case = Player::new(3, "admin");
        assert_eq!(policy.check(&other_case, std::slice::from_ref(&first)), None);
    }

    #[tokio::test]
    async fn test_duplicate_name_kicks_second_connection_only() {
        let (connections, commands) = test_connections(ConnectionsConfig::default());

        let first = connect(&connections, 1, "Admin", "10.0.0.1").await;
        connections.admit(first).await.unwrap();
        let second = connect(&connections, 2, "Admin", "10.0.0.2").await;
        connections.admit(second).await.unwrap();

        assert_eq!(
            commands.kicks(),
            vec![(2, DUPLICATE_NAME_REASON.to_string())]
        );
        // Kicks do not remove players
        assert_eq!(connections.registry().count().await, 2);
    }

    #[tokio::test]
    async fn test_no_kick_after_first_disconnects() {
        let (connections, commands) = test_connections(ConnectionsConfig::default());

        let first = connect(&connections, 1, "Admin", "10.0.0.1").await;
        connections.admit(first).await.unwrap();
        connections.registry().disconnect(1, None).await;
        let second = connect(&connections, 2, "Admin", "10.0.0.2").await;
        connections.admit(second).await.unwrap();

        assert!(commands.kicks().is_empty());
    }

    #[tokio::test]
    async fn test_kick_unknown_connection() {
        let (connections, commands) = test_connections(ConnectionsConfig::default());
        let err = connections.kick(9, "bye").await.unwrap_err();
        assert!(matches!(err, WardenError::NotConnected(9)));
        assert_eq!(
            err.to_string(),
            "Cannot kick a player (CID: 9) that isn't connected."
        );
        assert!(commands.kicks().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_kick_is_an_error() {
        let (connections, commands) = test_connections(ConnectionsConfig::default());
        connect(&connections, 1, "Bob", "10.0.0.1").await;
        commands.reject_kicks();
        assert!(connections.kick(1, "bye").await.is_err());
    }

    #[tokio::test]
    async fn test_kick_for_issues_timed_ip_ban() {
        let (connections, commands) = test_connections(ConnectionsConfig::default());
        connect(&connections, 3, "Bob", "10.0.0.1").await;
        connections
            .kick_for(3, "cool off", Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(commands.timed_bans(), vec![(3, BanType::Ip, 600)]);
    }

    #[tokio::test]
    async fn test_refresh_listing_converges_and_kicks_unnoticed() {
        let (connections, commands) = test_connections(ConnectionsConfig::default());
        connect(&connections, 1, "Bob", "10.0.0.1").await;
        connect(&connections, 2, "Eve", "10.0.0.2").await;

        commands.set_listing(vec![listed(1, "Bob", "uuid-bob"), listed(5, "Ghost", "uuid-ghost")]);
        let result = connections.refresh_listing().await.unwrap();
        assert_eq!(result.added.len(), 1);
        assert_eq!(result.removed.len(), 1);

        let ids: Vec<ConnectionId> = connections
            .registry()
            .players()
            .await
            .iter()
            .map(|p| p.connection_id)
            .collect();
        assert_eq!(ids, vec![1, 5]);
        assert_eq!(commands.kicks(), vec![(5, UNNOTICED_REASON.to_string())]);

        // Same listing again changes nothing
        let again = connections.refresh_listing().await.unwrap();
        assert!(again.is_empty());
        assert_eq!(connections.registry().count().await, 2);
    }

    #[tokio::test]
    async fn test_player_joining_during_listing_is_kept() {
        let (connections, commands) = test_connections(ConnectionsConfig::default());
        commands.delay_listing(Duration::from_millis(100));

        let refresh = {
            let connections = connections.clone();
            tokio::spawn(async move { connections.refresh_listing().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        connect(&connections, 9, "Bob", "10.0.0.9").await;

        let result = refresh.await.unwrap().unwrap();
        assert!(result.removed.is_empty());
        assert!(connections.registry().get(9).await.is_some());

        // The next listing shows Bob, who is already known
        commands.delay_listing(Duration::ZERO);
        commands.set_listing(vec![listed(9, "Bob", "uuid-bob")]);
        let result = connections.refresh_listing().await.unwrap();
        assert!(result.added.is_empty());
        assert_eq!(result.updated.len(), 1);
        assert!(commands.kicks().is_empty());
    }

    #[tokio::test]
    async fn test_player_leaving_during_listing_is_not_restored() {
        let (connections, commands) = test_connections(ConnectionsConfig::default());
        connect(&connections, 4, "Eve", "10.0.0.4").await;
        commands.set_listing(vec![listed(4, "Eve", "uuid-eve")]);
        commands.delay_listing(Duration::from_millis(100));

        let refresh = {
            let connections = connections.clone();
            tokio::spawn(async move { connections.refresh_listing().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        connections.registry().disconnect(4, None).await;

        let result = refresh.await.unwrap().unwrap();
        assert!(result.added.is_empty());
        assert_eq!(connections.registry().count().await, 0);
        assert!(commands.kicks().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_listing_enforces_names_when_not_kicking_unnoticed() {
        let config = ConnectionsConfig {
            kick_unnoticed: false,
            ..Default::default()
        };
        let (connections, commands) = test_connections(config);
        commands.set_listing(vec![listed(1, "Fine", "u1"), listed(2, "<Bad>", "u2")]);
        connections.refresh_listing().await.unwrap();
        assert_eq!(commands.kicks(), vec![(2, ILLEGAL_NAME_REASON.to_string())]);
    }

    #[tokio::test]
    async fn test_admit_sets_vpn_flag() {
        let config = ConnectionsConfig {
            vpn_ranges: vec!["10.0.0.0/8".to_string()],
            ..Default::default()
        };
        let (connections, _commands) = test_connections(config);
        let player = connect(&connections, 1, "Bob", "10.1.2.3").await;
        let player = connections.admit(player).await.unwrap();
        assert!(player.is_vpn);
        assert!(!player.is_admin);
    }

    #[tokio::test]
    async fn test_listing_failure_is_reported() {
        let (connections, commands) = test_connections(ConnectionsConfig::default());
        commands.fail_listing();
        assert!(connections.refresh_listing().await.is_err());
    }
}
