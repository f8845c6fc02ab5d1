//! Interfaces consumed from the services around the supervisor
//!
//! The supervisor never talks to RCON, a database or a gateway directly.
//! It goes through these traits so each side can be swapped or faked.

use async_trait::async_trait;
use std::time::Duration;
use warden_core::{Ban, BanType, ConnectionId, ListedPlayer, Player, Result, ServerSettings};

/// Outcome of a command sent to the game server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Command channel into the running game server
#[async_trait]
pub trait CommandClient: Send + Sync + 'static {
    /// Execute a raw command
    async fn execute(&self, command: &str) -> Result<CommandResponse>;

    /// Kick a connection
    async fn kick(&self, connection: ConnectionId, reason: &str) -> Result<CommandResponse>;

    /// Ban a connection for a duration through the server's own ban list
    async fn ban(
        &self,
        connection: ConnectionId,
        reason: &str,
        ban_type: BanType,
        duration: Duration,
    ) -> Result<CommandResponse>;

    /// Authoritative list of current connections
    async fn list(&self) -> Result<Vec<ListedPlayer>>;

    /// Ask the server to reload its configuration file
    async fn reload_server(&self) -> Result<CommandResponse>;

    /// Say something to every player
    async fn broadcast(&self, message: &str) -> Result<CommandResponse>;

    /// Where a connection currently is
    async fn whereis(&self, connection: ConnectionId) -> Result<CommandResponse>;
}

/// Persistence for bans, sessions, uptime and accounts
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Insert or update a ban. A ban without a ticket receives one.
    async fn save_ban(&self, ban: Ban) -> Result<Ban>;

    /// Every stored ban
    async fn bans(&self) -> Result<Vec<Ban>>;

    /// Open a session for a newly connected player
    async fn open_session(&self, player: &Player) -> Result<u64>;

    /// Close the open session of a connection, if any
    async fn close_session(&self, connection: ConnectionId) -> Result<()>;

    /// Close every open session, returning how many were closed
    async fn close_open_sessions(&self) -> Result<usize>;

    /// Record the start of a server run
    async fn start_uptime(&self) -> Result<u64>;

    /// Record the end of a server run
    async fn end_uptime(&self, id: u64, reason: &str, last_log: &str) -> Result<()>;

    /// Close runs that never recorded an end
    async fn close_open_uptimes(&self, reason: &str) -> Result<usize>;

    /// Whether an account has administrator rights
    async fn is_admin(&self, account: &str) -> Result<bool>;
}

/// Storage of the game server's configuration file
#[async_trait]
pub trait SettingsStore: Send + Sync + 'static {
    async fn load(&self) -> Result<ServerSettings>;

    async fn save(&self, settings: &ServerSettings) -> Result<()>;
}

/// Push channel towards gateways and dashboards
pub trait EventSink: Send + Sync + 'static {
    fn publish(&self, event: &str, payload: serde_json::Value);
}
