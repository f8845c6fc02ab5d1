//! In-crate fakes shared by the unit tests

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warden_core::{
    BanType, ConnectionId, ListedPlayer, PendingLogin, Player, Result, WardenError,
};

use crate::collaborators::{CommandClient, CommandResponse, EventSink, Store};
use crate::config::ConnectionsConfig;
use crate::connections::Connections;
use crate::control::ServerControl;
use crate::events::{BroadcastSink, Event};
use crate::moderation::Moderation;
use crate::monitor::MonitorContext;
use crate::settings::{MemorySettingsStore, SettingsManager};
use crate::store::MemoryStore;

#[derive(Default)]
struct Recorded {
    kicks: Vec<(ConnectionId, String)>,
    timed_bans: Vec<(ConnectionId, BanType, u64)>,
    executed: Vec<String>,
    broadcasts: Vec<String>,
    reloads: usize,
    listing: Vec<ListedPlayer>,
    listing_delay: Duration,
    fail_listing: bool,
    reject_kicks: bool,
}

/// Command client that records everything and always succeeds unless told otherwise
#[derive(Default)]
pub struct RecordingCommands {
    recorded: Mutex<Recorded>,
}

impl RecordingCommands {
    fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        f(&mut self.recorded.lock().unwrap())
    }

    pub fn kicks(&self) -> Vec<(ConnectionId, String)> {
        self.with(|r| r.kicks.clone())
    }

    pub fn timed_bans(&self) -> Vec<(ConnectionId, BanType, u64)> {
        self.with(|r| r.timed_bans.clone())
    }

    pub fn executed(&self) -> Vec<String> {
        self.with(|r| r.executed.clone())
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.with(|r| r.broadcasts.clone())
    }

    pub fn reloads(&self) -> usize {
        self.with(|r| r.reloads)
    }

    pub fn set_listing(&self, listing: Vec<ListedPlayer>) {
        self.with(|r| r.listing = listing);
    }

    /// Make `list()` answer only after `delay`
    pub fn delay_listing(&self, delay: Duration) {
        self.with(|r| r.listing_delay = delay);
    }

    pub fn fail_listing(&self) {
        self.with(|r| r.fail_listing = true);
    }

    pub fn reject_kicks(&self) {
        self.with(|r| r.reject_kicks = true);
    }
}

#[async_trait]
impl CommandClient for RecordingCommands {
    async fn execute(&self, command: &str) -> Result<CommandResponse> {
        self.with(|r| r.executed.push(command.to_string()));
        Ok(CommandResponse::ok(""))
    }

    async fn kick(&self, connection: ConnectionId, reason: &str) -> Result<CommandResponse> {
        self.with(|r| {
            if r.reject_kicks {
                return Ok(CommandResponse::failed("No such client"));
            }
            r.kicks.push((connection, reason.to_string()));
            Ok(CommandResponse::ok(format!("Successfully kicked {}", connection)))
        })
    }

    async fn ban(
        &self,
        connection: ConnectionId,
        _reason: &str,
        ban_type: BanType,
        duration: Duration,
    ) -> Result<CommandResponse> {
        self.with(|r| r.timed_bans.push((connection, ban_type, duration.as_secs())));
        Ok(CommandResponse::ok(format!("Successfully banned {}", connection)))
    }

    async fn list(&self) -> Result<Vec<ListedPlayer>> {
        let delay = self.with(|r| r.listing_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.with(|r| {
            if r.fail_listing {
                Err(WardenError::Command("RCON unavailable".to_string()))
            } else {
                Ok(r.listing.clone())
            }
        })
    }

    async fn reload_server(&self) -> Result<CommandResponse> {
        self.with(|r| r.reloads += 1);
        Ok(CommandResponse::ok("Reloaded"))
    }

    async fn broadcast(&self, message: &str) -> Result<CommandResponse> {
        self.with(|r| r.broadcasts.push(message.to_string()));
        Ok(CommandResponse::ok(""))
    }

    async fn whereis(&self, connection: ConnectionId) -> Result<CommandResponse> {
        Ok(CommandResponse::ok(format!("CelestialWorld:{}", connection)))
    }
}

/// Log in and connect a player through the registry
pub async fn connect(connections: &Connections, id: ConnectionId, name: &str, address: &str) -> Player {
    connections
        .registry()
        .record_login(PendingLogin {
            account: None,
            character: name.to_string(),
            address: address.to_string(),
        })
        .await;
    connections
        .registry()
        .connect(id, name, address)
        .await
        .unwrap()
}

pub fn listed(id: ConnectionId, name: &str, uuid: &str) -> ListedPlayer {
    ListedPlayer {
        connection_id: id,
        name: name.to_string(),
        uuid: uuid.to_string(),
    }
}

pub fn test_connections(config: ConnectionsConfig) -> (Arc<Connections>, Arc<RecordingCommands>) {
    let commands = Arc::new(RecordingCommands::default());
    let connections = Connections::new(
        &config,
        commands.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(crate::events::NullSink),
    )
    .unwrap();
    (Arc::new(connections), commands)
}

/// Everything a monitor needs, wired to in-memory fakes
pub struct Harness {
    pub ctx: MonitorContext,
    pub commands: Arc<RecordingCommands>,
    pub store: Arc<MemoryStore>,
    pub settings_store: Arc<MemorySettingsStore>,
    pub sink: Arc<BroadcastSink>,
    pub events: tokio::sync::broadcast::Receiver<Event>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(ConnectionsConfig::default(), MemoryStore::new())
    }

    pub fn with_config(config: ConnectionsConfig) -> Self {
        Self::build(config, MemoryStore::new())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        Self::build(ConnectionsConfig::default(), store)
    }

    fn build(config: ConnectionsConfig, store: MemoryStore) -> Self {
        let commands = Arc::new(RecordingCommands::default());
        let store = Arc::new(store);
        let settings_store = Arc::new(MemorySettingsStore::default());
        let sink = Arc::new(BroadcastSink::new(64));
        let events = sink.subscribe();

        let connections = Arc::new(
            Connections::new(&config, commands.clone(), store.clone(), sink.clone()).unwrap(),
        );
        let settings = Arc::new(SettingsManager::new(
            settings_store.clone(),
            store.clone(),
            commands.clone(),
        ));
        let moderation = Arc::new(Moderation::new(
            connections.clone(),
            store.clone(),
            settings.clone(),
            sink.clone(),
        ));

        let ctx = MonitorContext {
            connections,
            moderation,
            settings,
            store: store.clone() as Arc<dyn Store>,
            sink: sink.clone() as Arc<dyn EventSink>,
            control: ServerControl::new(),
        };

        Self {
            ctx,
            commands,
            store,
            settings_store,
            sink,
            events,
        }
    }

    /// Names of the events published so far
    pub fn event_names(&mut self) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            names.push(event.name);
        }
        names
    }
}
