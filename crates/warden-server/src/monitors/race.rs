//! Custom race crash attribution
//!
//! A client using a race the server does not know makes the universe server
//! throw the same `MapException` over and over. The first occurrence of a
//! key holds the most recently connected player accountable; once the key
//! repeats more than `threshold` times that player is banned (or kicked, for
//! admins) and the server restarts.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use warden_core::{ConnectionId, Level, Message, Result, WardenError};

use crate::collaborators::EventSink;
use crate::connections::Connections;
use crate::events::names;
use crate::moderation::{BanOptions, Moderation};
use crate::monitor::{Monitor, MonitorContext, Verdict};

pub const MAP_EXCEPTION_PREFIX: &str = "UniverseServer: exception caught: (MapException)";
pub const RACE_MODERATOR: &str = "race-monitor";
pub const RACE_SHUTDOWN_REASON: &str = "Custom race detected";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RaceConfig {
    pub threshold: u32,
    /// First capture group is the offending key
    pub key_pattern: String,
    /// Ban reason; `{key}` is replaced with the offending key
    pub ban_format: String,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            key_pattern: r"Key '(.+)' not found".to_string(),
            ban_format: "^orange;You have been banned ^white;automatically ^orange;for using custom races.\n\
                         We detected the race ^white;'{key}'\n\
                         ^orange;Your ^pink;ticket ^orange;is ^white;{ticket}"
                .to_string(),
        }
    }
}

pub struct RaceMonitor {
    connections: Arc<Connections>,
    moderation: Arc<Moderation>,
    sink: Arc<dyn EventSink>,
    key_pattern: Regex,
    threshold: u32,
    ban_format: String,
    key: Option<String>,
    count: u32,
    accountable: Option<ConnectionId>,
}

impl RaceMonitor {
    pub fn new(ctx: &MonitorContext, config: RaceConfig) -> Result<Self> {
        let key_pattern = Regex::new(&config.key_pattern).map_err(|e| {
            WardenError::Config(format!("Invalid race key pattern {}: {}", config.key_pattern, e))
        })?;
        Ok(Self {
            connections: ctx.connections.clone(),
            moderation: ctx.moderation.clone(),
            sink: ctx.sink.clone(),
            key_pattern,
            threshold: config.threshold,
            ban_format: config.ban_format,
            key: None,
            count: 0,
            accountable: None,
        })
    }

    /// Current key and how many times it was seen in a row
    pub fn tally(&self) -> (Option<&str>, u32) {
        (self.key.as_deref(), self.count)
    }

    fn reset(&mut self) {
        self.key = None;
        self.count = 0;
        self.accountable = None;
    }

    async fn punish(&mut self, message: &Message, key: &str) {
        error!("Race crash detected for key '{}'", key);
        let registry = self.connections.registry();

        let held = match self.accountable {
            Some(id) => registry.get(id).await,
            None => None,
        };
        let player = match held {
            Some(player) => Some(player),
            None => {
                warn!("Accountable player is gone, using the latest player instead");
                registry.latest_player().await
            }
        };

        self.sink.publish(
            names::RACE_CRASH,
            serde_json::json!({
                "message": message.to_string(),
                "key": key,
                "player": player,
            }),
        );

        let Some(player) = player else {
            warn!("Nobody to hold accountable for race '{}'", key);
            return;
        };

        let reason = self.ban_format.replace("{key}", key);
        if player.is_admin {
            info!("Accountable player {} is an admin, kicking only", player.username);
            if let Err(e) = self.connections.kick(player.connection_id, &reason).await {
                warn!("Failed to kick {}: {}", player.connection_id, e);
            }
        } else if let Err(e) = self
            .moderation
            .ban_player(&player, &reason, RACE_MODERATOR, BanOptions::quiet())
            .await
        {
            error!("Failed to ban {}: {}", player.connection_id, e);
        }
    }
}

#[async_trait]
impl Monitor for RaceMonitor {
    fn name(&self) -> &str {
        "race"
    }

    fn priority(&self) -> i32 {
        59
    }

    async fn initialize(&mut self) -> Result<()> {
        info!("Race ban message: {}", self.ban_format);
        Ok(())
    }

    async fn on_server_exit(&mut self, _reason: &str) -> Result<()> {
        self.reset();
        Ok(())
    }

    async fn handle_message(&mut self, message: &Message) -> Verdict {
        if message.level != Level::Error || !message.content.starts_with(MAP_EXCEPTION_PREFIX) {
            return Verdict::Continue;
        }

        let Some(key) = self
            .key_pattern
            .captures(&message.content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
        else {
            return Verdict::Continue;
        };

        if key.starts_with('(') {
            warn!("Possible coordinate exploit: {}", key);
            return Verdict::Continue;
        }

        if self.key.as_deref() != Some(key.as_str()) {
            self.key = Some(key.clone());
            self.count = 0;
        }
        if self.count == 0 {
            self.accountable = self.connections.registry().last_connected_id().await;
            info!("Race error for '{}', holding {:?} accountable", key, self.accountable);
        }

        self.count += 1;
        if self.count <= self.threshold {
            return Verdict::Continue;
        }

        self.punish(message, &key).await;
        self.reset();
        Verdict::Terminate(RACE_SHUTDOWN_REASON.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Store;
    use crate::testing::{Harness, connect, listed};

    fn race_error(key: &str) -> Message {
        Message::parse(&format!(
            "[Error] {} Key '{}' not found in map",
            MAP_EXCEPTION_PREFIX, key
        ))
    }

    #[tokio::test]
    async fn test_fourth_occurrence_bans_accountable_player() {
        let mut harness = Harness::new();
        connect(&harness.ctx.connections, 7, "Racer", "10.0.0.7").await;
        harness.commands.set_listing(vec![listed(7, "Racer", "uuid-7")]);
        let mut monitor = RaceMonitor::new(&harness.ctx, RaceConfig::default()).unwrap();

        for _ in 0..3 {
            assert!(matches!(
                monitor.handle_message(&race_error("fennix")).await,
                Verdict::Continue
            ));
        }
        // Someone else joins; the first occurrence already picked 7
        connect(&harness.ctx.connections, 8, "Innocent", "10.0.0.8").await;

        match monitor.handle_message(&race_error("fennix")).await {
            Verdict::Terminate(reason) => assert_eq!(reason, RACE_SHUTDOWN_REASON),
            other => panic!("unexpected verdict {:?}", other),
        }

        let bans = harness.store.bans().await.unwrap();
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0].ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(bans[0].moderator, RACE_MODERATOR);
        assert!(bans[0].reason.contains("'fennix'"));
        // Quiet ban: no reload, no kick
        assert_eq!(harness.commands.reloads(), 0);
        assert!(harness.commands.kicks().is_empty());
        assert!(harness.event_names().contains(&names::RACE_CRASH.to_string()));
        assert_eq!(monitor.tally(), (None, 0));
    }

    #[tokio::test]
    async fn test_key_change_resets_counter() {
        let harness = Harness::new();
        let mut monitor = RaceMonitor::new(&harness.ctx, RaceConfig::default()).unwrap();

        for key in ["a", "a", "a", "b", "b", "b"] {
            assert!(matches!(
                monitor.handle_message(&race_error(key)).await,
                Verdict::Continue
            ));
        }
        assert_eq!(monitor.tally(), (Some("b"), 3));
    }

    #[tokio::test]
    async fn test_coordinate_keys_are_ignored() {
        let harness = Harness::new();
        let mut monitor = RaceMonitor::new(&harness.ctx, RaceConfig::default()).unwrap();
        for _ in 0..10 {
            assert!(matches!(
                monitor.handle_message(&race_error("(1, 2)")).await,
                Verdict::Continue
            ));
        }
        assert_eq!(monitor.tally(), (None, 0));
    }

    #[tokio::test]
    async fn test_admin_is_kicked_not_banned() {
        let harness = Harness::with_store(crate::store::MemoryStore::new().with_admins(["boss"]));
        let mut player = connect(&harness.ctx.connections, 2, "Boss", "10.0.0.2").await;
        player.account = Some("boss".to_string());
        harness
            .ctx
            .connections
            .registry()
            .update(2, |p| p.account = Some("boss".to_string()))
            .await;
        harness.ctx.connections.admit(player).await.unwrap();

        let mut monitor = RaceMonitor::new(&harness.ctx, RaceConfig::default()).unwrap();
        let mut verdict = Verdict::Continue;
        for _ in 0..4 {
            verdict = monitor.handle_message(&race_error("x")).await;
        }
        assert!(matches!(verdict, Verdict::Terminate(_)));
        assert!(harness.store.bans().await.unwrap().is_empty());
        assert_eq!(harness.commands.kicks().len(), 1);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let harness = Harness::new();
        let config = RaceConfig {
            key_pattern: "(".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            RaceMonitor::new(&harness.ctx, config),
            Err(WardenError::Config(_))
        ));
    }
}
