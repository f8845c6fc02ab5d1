//! Player tracking from the log stream
//!
//! Feeds login, connect, disconnect, warp and `/nick` lines into the
//! registry. While the server runs it also reconciles against the server's
//! listing on a timer and forwards registry changes to the event sink and
//! the session store.

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warden_core::player::account_from_log;
use warden_core::{ConnectionId, Level, Message, PendingLogin, Result, WardenError};

use crate::collaborators::{EventSink, Store};
use crate::connections::Connections;
use crate::events::names;
use crate::monitor::{Monitor, MonitorContext, Verdict};
use crate::registry::ConnectionEvent;

const LOGGED_PREFIX: &str = "UniverseServer: Logged";
const CLIENT_PREFIX: &str = "UniverseServer: Client";
const WARP_PREFIX: &str = "UniverseServer: Warp";
const NICK_COMMAND: &str = "/nick";

pub struct ConnectionMonitor {
    connections: Arc<Connections>,
    store: Arc<dyn Store>,
    sink: Arc<dyn EventSink>,
    refresh_interval: Duration,
    logged: Regex,
    client: Regex,
    warp: Regex,
    tasks: Vec<JoinHandle<()>>,
}

impl ConnectionMonitor {
    pub fn new(ctx: &MonitorContext) -> Result<Self> {
        Ok(Self {
            connections: ctx.connections.clone(),
            store: ctx.store.clone(),
            sink: ctx.sink.clone(),
            refresh_interval: ctx.connections.refresh_interval(),
            logged: compile(r"'(.*)' as player '(.*)' from address ([a-zA-Z0-9.:]*)")?,
            client: compile(
                r"'(.*)' <(\d+)> \(([a-zA-Z0-9.:]*)\) (connected|disconnected)( for reason: (.*))?",
            )?,
            warp: compile(r"^UniverseServer: Warp\S* \S+ (\d+) to (.+)$")?,
            tasks: Vec::new(),
        })
    }

    async fn handle_chat(&self, message: &Message) -> Result<()> {
        let Some(rest) = message.content.strip_prefix(NICK_COMMAND) else {
            return Ok(());
        };
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            return Ok(());
        }
        let nickname = rest.trim();
        let Some(author) = message.author.as_deref().filter(|_| !nickname.is_empty()) else {
            return Ok(());
        };

        match self.connections.registry().set_nickname(author, nickname).await {
            Some(player) => {
                info!("Nickname set for {} to {}", player.username, nickname);
                self.connections.enforce_name(&player).await?;
            }
            None => warn!(
                "Cannot set nickname '{}' for '{}': not connected",
                nickname, author
            ),
        }
        Ok(())
    }

    async fn handle_info(&self, content: &str) -> Result<()> {
        if content.starts_with(WARP_PREFIX) {
            if content.contains("failed") {
                return Ok(());
            }
            let Some(captures) = self.warp.captures(content) else {
                debug!("Unrecognised warp line: {}", content);
                return Ok(());
            };
            let connection = parse_connection(&captures[1])?;
            let location = captures[2].trim().to_string();
            let updated = self
                .connections
                .registry()
                .update(connection, |player| player.location = Some(location))
                .await;
            if updated.is_none() {
                warn!("Warp for unknown connection {}", connection);
            }
            return Ok(());
        }

        if content.starts_with(LOGGED_PREFIX) {
            match self.logged.captures(content) {
                Some(captures) => {
                    self.connections
                        .registry()
                        .record_login(PendingLogin {
                            account: account_from_log(&captures[1]),
                            character: captures[2].to_string(),
                            address: captures[3].to_string(),
                        })
                        .await;
                }
                None => warn!("Unable to match login line: {}", content),
            }
            return Ok(());
        }

        if content.starts_with(CLIENT_PREFIX) {
            let Some(captures) = self.client.captures(content) else {
                warn!("Unable to match client line: {}", content);
                return Ok(());
            };
            let character = &captures[1];
            let connection = parse_connection(&captures[2])?;
            let address = &captures[3];

            if &captures[4] == "connected" {
                if let Some(player) = self
                    .connections
                    .registry()
                    .connect(connection, character, address)
                    .await
                {
                    info!("Player {} connected as {}", player.username, connection);
                    self.connections.admit(player).await?;
                }
            } else {
                let reason = captures.get(6).map(|m| m.as_str());
                if self
                    .connections
                    .registry()
                    .disconnect(connection, reason)
                    .await
                    .is_none()
                {
                    debug!("Disconnect for unknown connection {}", connection);
                }
            }
        }
        Ok(())
    }

    fn spawn_forwarder(&mut self) {
        let mut events = self.connections.registry().subscribe();
        let store = self.store.clone();
        let sink = self.sink.clone();

        self.tasks.push(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => forward(&event, store.as_ref(), sink.as_ref()).await,
                    Err(RecvError::Lagged(n)) => {
                        warn!("Connection event forwarder lagged by {} events", n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    fn spawn_refresher(&mut self) {
        let connections = self.connections.clone();
        let period = self.refresh_interval;

        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = connections.refresh_listing().await {
                    warn!("Periodic listing refresh failed: {}", e);
                }
            }
        }));
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl Monitor for ConnectionMonitor {
    fn name(&self) -> &str {
        "connections"
    }

    fn priority(&self) -> i32 {
        0
    }

    async fn on_server_start(&mut self) -> Result<()> {
        self.abort_tasks();
        self.spawn_forwarder();
        self.spawn_refresher();
        Ok(())
    }

    async fn on_server_exit(&mut self, _reason: &str) -> Result<()> {
        self.abort_tasks();
        self.connections.registry().clear().await;
        let closed = self.store.close_open_sessions().await?;
        if closed > 0 {
            debug!("Closed {} sessions left open at exit", closed);
        }
        Ok(())
    }

    async fn deinitialize(&mut self) -> Result<()> {
        self.abort_tasks();
        Ok(())
    }

    async fn handle_message(&mut self, message: &Message) -> Verdict {
        let result = match message.level {
            Level::Chat => self.handle_chat(message).await,
            Level::Info => self.handle_info(&message.content).await,
            _ => Ok(()),
        };
        result.into()
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

async fn forward(event: &ConnectionEvent, store: &dyn Store, sink: &dyn EventSink) {
    match event {
        ConnectionEvent::Connected(player) => {
            sink.publish(names::PLAYER_CONNECT, to_payload(player));
            if let Err(e) = store.open_session(player).await {
                warn!("Failed to open session for {}: {}", player.connection_id, e);
            }
        }
        ConnectionEvent::Disconnected { player, reason } => {
            if let Err(e) = store.close_session(player.connection_id).await {
                warn!("Failed to close session for {}: {}", player.connection_id, e);
            }
            sink.publish(
                names::PLAYER_DISCONNECT,
                serde_json::json!({ "player": player, "reason": reason }),
            );
        }
        ConnectionEvent::Updated(player) => {
            sink.publish(names::PLAYER_UPDATE, to_payload(player));
        }
    }
}

fn to_payload<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn parse_connection(text: &str) -> Result<ConnectionId> {
    text.parse()
        .map_err(|_| WardenError::Protocol(format!("Invalid connection id: {}", text)))
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| WardenError::Config(format!("Invalid pattern {}: {}", pattern, e)))
}
