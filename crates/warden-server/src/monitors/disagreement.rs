//! Packet disagreement crash attribution
//!
//! Clients running mods that change shared data make the world thread fail
//! while decoding their packets. The client named in the error is banned
//! and the server restarts.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, warn};
use warden_core::{ConnectionId, Level, Message, Player};

use crate::collaborators::EventSink;
use crate::connections::Connections;
use crate::events::names;
use crate::moderation::{BanOptions, Moderation};
use crate::monitor::{Monitor, MonitorContext, Verdict};

pub const DISAGREEMENT_PREFIX: &str =
    "WorldServerThread exception caught handling incoming packets for client";
pub const DISAGREEMENT_MODERATOR: &str = "disagreement-monitor";
pub const DISAGREEMENT_SHUTDOWN_REASON: &str = "Disagreement Exception";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisagreementConfig {
    pub ban_format: String,
}

impl Default for DisagreementConfig {
    fn default() -> Self {
        Self {
            ban_format: "^orange;You have been banned ^white;automatically ^orange;for using mods that are NOT multiplayer friendly.\n\
                         ^orange;Your ^pink;ticket ^orange;is ^white;{ticket}"
                .to_string(),
        }
    }
}

pub struct DisagreementMonitor {
    connections: Arc<Connections>,
    moderation: Arc<Moderation>,
    sink: Arc<dyn EventSink>,
    ban_format: String,
}

impl DisagreementMonitor {
    pub fn new(ctx: &MonitorContext, config: DisagreementConfig) -> Self {
        Self {
            connections: ctx.connections.clone(),
            moderation: ctx.moderation.clone(),
            sink: ctx.sink.clone(),
            ban_format: config.ban_format,
        }
    }

    async fn offender(&self, rest: &str) -> Option<Player> {
        let id_text = rest.split(':').next().unwrap_or_default().trim();
        let Ok(connection) = id_text.parse::<ConnectionId>() else {
            warn!("Failed to parse the client '{}' of a disagreement", id_text);
            return None;
        };

        let registry = self.connections.registry();
        match registry.get(connection).await {
            Some(player) => Some(player),
            None => {
                warn!("Client {} is gone, using the latest player instead", connection);
                registry.latest_player().await
            }
        }
    }
}

#[async_trait]
impl Monitor for DisagreementMonitor {
    fn name(&self) -> &str {
        "disagreement"
    }

    async fn handle_message(&mut self, message: &Message) -> Verdict {
        if message.level != Level::Error {
            return Verdict::Continue;
        }
        let Some(rest) = message.content.strip_prefix(DISAGREEMENT_PREFIX) else {
            return Verdict::Continue;
        };

        error!("Disagreement crash: {}", message);
        let player = self.offender(rest).await;

        let mut outcome = Verdict::Terminate(DISAGREEMENT_SHUTDOWN_REASON.to_string());
        if let Some(player) = &player {
            if let Err(e) = self
                .moderation
                .ban_player(player, &self.ban_format, DISAGREEMENT_MODERATOR, BanOptions::quiet())
                .await
            {
                error!("Failed to ban {}: {}", player.connection_id, e);
                outcome = Verdict::Terminate(format!("Disagreement Shutdown: {}", e));
            }
        }

        self.sink.publish(
            names::DISAGREEMENT_CRASH,
            serde_json::json!({ "message": message.to_string(), "player": player }),
        );
        outcome
    }
}
