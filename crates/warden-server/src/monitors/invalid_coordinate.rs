//! Invalid coordinate attribution
//!
//! Flying a ship to a coordinate outside the universe makes the celestial
//! database throw. The last "Flying ship" line names the pilot, who is
//! banned when the fatal error follows.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use warden_core::{ConnectionId, Level, Message, Player, Result};

use crate::collaborators::EventSink;
use crate::connections::Connections;
use crate::events::names;
use crate::moderation::{BanOptions, Moderation};
use crate::monitor::{Monitor, MonitorContext, Verdict};

pub const FLYING_SHIP_PREFIX: &str = "Flying ship for player ";
pub const INVALID_COORDINATE_ERROR: &str = "UniverseServer: exception caught: (CelestialException) CelestialMasterDatabase::childOrbits called on invalid coordinate";
pub const INVALID_COORDINATE_MODERATOR: &str = "invalidcoord-monitor";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InvalidCoordinateConfig {
    pub ban_format: String,
}

impl Default for InvalidCoordinateConfig {
    fn default() -> Self {
        Self {
            ban_format: "^orange;You have been banned ^white;automatically ^orange;for generating invalid coordinates.\n\
                         ^orange;Your ^pink;ticket ^orange;is ^white;{ticket}"
                .to_string(),
        }
    }
}

/// Last flight seen before a possible crash
#[derive(Debug, Clone)]
struct Flight {
    player: Player,
    coordinate: String,
}

pub struct InvalidCoordinateMonitor {
    connections: Arc<Connections>,
    moderation: Arc<Moderation>,
    sink: Arc<dyn EventSink>,
    ban_format: String,
    last_flight: Option<Flight>,
}

impl InvalidCoordinateMonitor {
    pub fn new(ctx: &MonitorContext, config: InvalidCoordinateConfig) -> Self {
        Self {
            connections: ctx.connections.clone(),
            moderation: ctx.moderation.clone(),
            sink: ctx.sink.clone(),
            ban_format: config.ban_format,
            last_flight: None,
        }
    }

    /// Connection id of the cached pilot
    pub fn suspect(&self) -> Option<ConnectionId> {
        self.last_flight.as_ref().map(|f| f.player.connection_id)
    }

    async fn record_flight(&mut self, rest: &str) {
        let parts: Vec<&str> = rest.split_whitespace().collect();
        let Some(connection) = parts.first().and_then(|id| id.parse::<ConnectionId>().ok()) else {
            return;
        };
        let Some(coordinate) = parts.get(2).filter(|c| c.contains(':')) else {
            return;
        };

        self.last_flight = self
            .connections
            .registry()
            .get(connection)
            .await
            .map(|player| Flight {
                player,
                coordinate: coordinate.to_string(),
            });
    }

    async fn punish(&mut self) -> Result<()> {
        let Some(flight) = self.last_flight.take() else {
            warn!("Invalid coordinate generated but no flight was recorded");
            return Ok(());
        };
        error!(
            "Invalid coordinate generated. Last flight was {} by {}",
            flight.coordinate, flight.player.username
        );

        if !self.connections.registry().is_connected(&flight.player).await {
            info!("{} already left, not banning", flight.player.username);
            return Ok(());
        }

        self.moderation
            .ban_player(
                &flight.player,
                &self.ban_format,
                INVALID_COORDINATE_MODERATOR,
                BanOptions::default(),
            )
            .await?;
        self.sink.publish(
            names::INVALID_COORDINATE,
            serde_json::json!({
                "player": flight.player,
                "coordinate": flight.coordinate,
            }),
        );
        Ok(())
    }
}

#[async_trait]
impl Monitor for InvalidCoordinateMonitor {
    fn name(&self) -> &str {
        "invalid_coordinate"
    }

    fn priority(&self) -> i32 {
        51
    }

    async fn on_server_exit(&mut self, _reason: &str) -> Result<()> {
        self.last_flight = None;
        Ok(())
    }

    async fn handle_message(&mut self, message: &Message) -> Verdict {
        match message.level {
            Level::Info => {
                if let Some(rest) = message.content.strip_prefix(FLYING_SHIP_PREFIX) {
                    self.record_flight(rest).await;
                }
                Verdict::Continue
            }
            Level::Error if message.content == INVALID_COORDINATE_ERROR => self.punish().await.into(),
            _ => Verdict::Continue,
        }
    }
}
