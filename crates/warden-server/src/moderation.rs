//! Ban path shared by monitors and outer layers

use std::sync::Arc;
use tracing::{info, warn};
use warden_core::{Ban, Player, Result};

use crate::collaborators::{EventSink, Store};
use crate::connections::Connections;
use crate::events::names;
use crate::settings::SettingsManager;

/// Moderator name used when nobody is given
pub const DEFAULT_MODERATOR: &str = "warden";

/// What to do after a ban is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanOptions {
    /// Save the configuration and have the server reload it
    pub reload: bool,
    /// Kick the banned player
    pub kick: bool,
}

impl BanOptions {
    /// Store the ban only; used right before a forced restart
    pub fn quiet() -> Self {
        Self {
            reload: false,
            kick: false,
        }
    }
}

impl Default for BanOptions {
    fn default() -> Self {
        Self {
            reload: true,
            kick: true,
        }
    }
}

pub struct Moderation {
    connections: Arc<Connections>,
    store: Arc<dyn Store>,
    settings: Arc<SettingsManager>,
    sink: Arc<dyn EventSink>,
}

impl Moderation {
    pub fn new(
        connections: Arc<Connections>,
        store: Arc<dyn Store>,
        settings: Arc<SettingsManager>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            connections,
            store,
            settings,
            sink,
        }
    }

    pub fn connections(&self) -> &Arc<Connections> {
        &self.connections
    }

    /// Validate and store a ban, resolving its reason.
    ///
    /// With `reload` the configuration is saved and the server reloads it so
    /// the ban takes effect immediately.
    pub async fn add_ban(&self, ban: Ban, reload: bool) -> Result<Ban> {
        ban.validate()?;

        let mut stored = self.store.save_ban(ban).await?;
        stored.reason = stored.formatted_reason();
        let stored = self.store.save_ban(stored).await?;
        info!("Added {}", stored);

        self.sink.publish(
            names::BAN,
            serde_json::to_value(&stored).unwrap_or(serde_json::Value::Null),
        );

        if reload {
            self.settings.save(true).await?;
        }
        Ok(stored)
    }

    /// Ban a player by its current connection.
    ///
    /// The listing is refreshed first so the ban carries the freshest UUID;
    /// if the player left in the meantime the given snapshot is used.
    pub async fn ban_player(
        &self,
        player: &Player,
        reason: &str,
        moderator: &str,
        options: BanOptions,
    ) -> Result<Ban> {
        if let Err(e) = self.connections.refresh_listing().await {
            warn!("Could not refresh listing before ban: {}", e);
        }

        let target = self
            .connections
            .registry()
            .get(player.connection_id)
            .await
            .filter(|current| current.username == player.username)
            .unwrap_or_else(|| player.clone());

        let ban = self
            .add_ban(Ban::for_player(&target, reason, moderator), options.reload)
            .await?;

        if options.kick {
            if let Err(e) = self.connections.kick(target.connection_id, &ban.reason).await {
                warn!("Ban {:?} stored but kick failed: {}", ban.ticket, e);
            }
        }
        Ok(ban)
    }
}
