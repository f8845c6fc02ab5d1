//! Starbound's RCON command set

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};
use warden_core::{BanType, ConnectionId, ListedPlayer, Result};
use warden_server::{CommandClient, CommandResponse};

use crate::config::RconConfig;
use crate::rcon::RconClient;

/// `CommandClient` backed by the server's RCON port
pub struct StarboundCommands {
    client: RconClient,
}

impl StarboundCommands {
    pub fn new(client: RconClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: &RconConfig, address: String, password: String) -> Self {
        Self::new(RconClient::new(address, password, config.timeout()))
    }

    pub fn client(&self) -> &RconClient {
        &self.client
    }
}

/// Parse the output of `list`: one `$<id> : <name> : <uuid>` line per player.
/// Lines that don't fit are skipped.
pub fn parse_listing(output: &str) -> Vec<ListedPlayer> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim_end().strip_prefix('$')?;
            let (id, rest) = rest.split_once(" : ")?;
            let (name, uuid) = rest.rsplit_once(" : ")?;
            let connection_id = id.trim().parse().ok()?;
            if uuid.is_empty() || uuid.contains(char::is_whitespace) {
                return None;
            }
            Some(ListedPlayer {
                connection_id,
                name: name.to_string(),
                uuid: uuid.to_string(),
            })
        })
        .collect()
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "'"))
}

#[async_trait]
impl CommandClient for StarboundCommands {
    async fn execute(&self, command: &str) -> Result<CommandResponse> {
        debug!("Executing command: {}", command);
        let body = self.client.execute(command).await?;
        Ok(CommandResponse::ok(body))
    }

    async fn kick(&self, connection: ConnectionId, reason: &str) -> Result<CommandResponse> {
        let response = self
            .execute(&format!("kick ${} {}", connection, quote(reason)))
            .await?;
        if response.message.starts_with("Successfully") {
            Ok(response)
        } else {
            Ok(CommandResponse::failed(response.message))
        }
    }

    async fn ban(
        &self,
        connection: ConnectionId,
        reason: &str,
        ban_type: BanType,
        duration: Duration,
    ) -> Result<CommandResponse> {
        self.execute(&format!(
            "ban ${} {} {} {}",
            connection,
            quote(reason),
            ban_type.as_command_arg(),
            duration.as_secs()
        ))
        .await
    }

    async fn list(&self) -> Result<Vec<ListedPlayer>> {
        let response = self.execute("list").await?;
        if !response.message.starts_with('$') {
            // "There are no clients connected." or similar
            return Ok(Vec::new());
        }
        let players = parse_listing(&response.message);
        if players.len() != response.message.lines().filter(|l| l.starts_with('$')).count() {
            warn!("Some lines of the player listing could not be parsed");
        }
        Ok(players)
    }

    async fn reload_server(&self) -> Result<CommandResponse> {
        self.execute("serverreload").await
    }

    async fn broadcast(&self, message: &str) -> Result<CommandResponse> {
        self.execute(&format!("say {}", message)).await
    }

    async fn whereis(&self, connection: ConnectionId) -> Result<CommandResponse> {
        let response = self.execute(&format!("whereis ${}", connection)).await?;
        let prefix = format!("Client ${}'s current location is ", connection);
        match response.message.strip_prefix(&prefix) {
            Some(location) => Ok(CommandResponse::ok(location)),
            None => Ok(CommandResponse::failed(response.message)),
        }
    }
}
