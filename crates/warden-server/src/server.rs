//! Server orchestration
//!
//! [`Server`] owns one supervisor and one monitor pipeline. Each call to
//! [`Server::run`] performs a full run: write the configuration, start the
//! process, feed every log entry through the pipeline until someone asks
//! for termination or the process goes away, then tear down and notify the
//! monitors. [`ServerHandle`] is the cloneable surface for everything else.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use warden_core::{Ban, ConnectionId, Message, Player, Result};

use crate::collaborators::{CommandClient, EventSink, SettingsStore, Store};
use crate::config::{ConnectionsConfig, MonitorEntry, ServerConfig};
use crate::connections::Connections;
use crate::control::ServerControl;
use crate::events::names;
use crate::moderation::{BanOptions, Moderation};
use crate::monitor::{MonitorCatalog, MonitorContext, Pipeline};
use crate::process::{MemoryUsage, ProcessState, Supervisor};
use crate::registry::Reconciliation;
use crate::settings::SettingsManager;

/// Services the server is wired to
pub struct Collaborators {
    pub commands: Arc<dyn CommandClient>,
    pub store: Arc<dyn Store>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub sink: Arc<dyn EventSink>,
}

/// Snapshot of the server's health
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub state: ProcessState,
    pub runs: u64,
    pub connections: usize,
    pub pending_logins: usize,
    pub last_connection_id: Option<ConnectionId>,
    pub memory: Option<MemoryUsage>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<i64>,
    pub last_shutdown_reason: Option<String>,
}

pub struct Server {
    config: ServerConfig,
    supervisor: Arc<Supervisor>,
    ctx: MonitorContext,
    pipeline: Pipeline,
    initialized: bool,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        connections: &ConnectionsConfig,
        monitors: &[MonitorEntry],
        collaborators: Collaborators,
        catalog: &MonitorCatalog,
    ) -> Result<Self> {
        let Collaborators {
            commands,
            store,
            settings_store,
            sink,
        } = collaborators;

        let connections = Arc::new(Connections::new(
            connections,
            commands.clone(),
            store.clone(),
            sink.clone(),
        )?);
        let settings = Arc::new(SettingsManager::new(settings_store, store.clone(), commands));
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
            store,
            sink,
            control: ServerControl::new(),
        };
        let pipeline = catalog.build(monitors, &ctx)?;
        info!("Monitors: {}", pipeline.names().join(", "));

        Ok(Self {
            supervisor: Arc::new(Supervisor::new(config.process())),
            config,
            ctx,
            pipeline,
            initialized: false,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            supervisor: self.supervisor.clone(),
            ctx: self.ctx.clone(),
        }
    }

    /// Initialize the monitors. Called automatically by the first run.
    pub async fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        self.pipeline.initialize().await;
        self.initialized = true;
    }

    /// Stop any live process and release the monitors
    pub async fn shutdown(&mut self) {
        if self.supervisor.stop().await {
            info!("Stopped the server during shutdown");
        }
        if self.initialized {
            self.pipeline.deinitialize().await;
            self.initialized = false;
        }
    }

    /// Perform one run and return the reason it ended
    pub async fn run(&mut self) -> Result<String> {
        self.initialize().await;

        let control = self.ctx.control.clone();
        self.ctx.settings.load().await?;
        control.begin_run();

        self.pipeline.server_pre_start().await;
        if let Err(e) = self.ctx.settings.save(false).await {
            control.end_run();
            return Err(e);
        }

        let (mut lines, exited) = match self.supervisor.start().await {
            Ok(started) => started,
            Err(e) => {
                let reason = control.end_run();
                self.pipeline.server_exit(&reason).await;
                return Err(e);
            }
        };

        self.ctx.sink.publish(
            names::SERVER_START,
            serde_json::json!({ "run": self.supervisor.run_count() }),
        );
        self.pipeline.server_start().await;

        let discovered = loop {
            tokio::select! {
                biased;
                reason = control.terminated() => {
                    info!("Terminating: {}", reason);
                    break false;
                }
                entry = lines.next_entry() => match entry {
                    Ok(Some(line)) => {
                        let message = Message::parse(&line);
                        if let Some(reason) = self.pipeline.dispatch(&message).await {
                            control.terminate(reason);
                        }
                    }
                    Ok(None) => {
                        info!("Log stream closed");
                        break true;
                    }
                    Err(e) => {
                        error!("Failed to read the log stream: {}", e);
                        break true;
                    }
                },
            }
        };

        if discovered {
            self.supervisor.notify_stream_closed().await;
        } else {
            self.supervisor.stop().await;
        }

        let code = match exited.await {
            Ok(exit) => exit.code,
            Err(_) => {
                warn!("Exit notification was dropped");
                None
            }
        };

        let reason = control.end_run();
        info!("Server exited (code {:?}): {}", code, reason);
        self.ctx.sink.publish(
            names::SERVER_EXIT,
            serde_json::json!({ "reason": reason, "code": code }),
        );
        self.pipeline.server_exit(&reason).await;
        Ok(reason)
    }
}

/// Cloneable access to a running server
#[derive(Clone)]
pub struct ServerHandle {
    supervisor: Arc<Supervisor>,
    ctx: MonitorContext,
}

impl ServerHandle {
    pub async fn players(&self) -> Vec<Player> {
        self.ctx.connections.registry().players().await
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    pub fn control(&self) -> &ServerControl {
        &self.ctx.control
    }

    pub fn settings(&self) -> &Arc<SettingsManager> {
        &self.ctx.settings
    }

    pub async fn statistics(&self) -> Statistics {
        let registry = self.ctx.connections.registry();
        let control = &self.ctx.control;
        let started_at = control.started_at();
        let ended_at = control.ended_at();
        let uptime_secs = started_at.map(|start| {
            (ended_at.unwrap_or_else(Utc::now) - start).num_seconds().max(0)
        });

        Statistics {
            state: self.supervisor.state(),
            runs: self.supervisor.run_count(),
            connections: registry.count().await,
            pending_logins: registry.pending_count().await,
            last_connection_id: registry.last_connected_id().await,
            memory: self.supervisor.memory_usage().await,
            started_at,
            ended_at,
            uptime_secs,
            last_shutdown_reason: control.last_shutdown_reason(),
        }
    }

    /// End the current run
    pub fn terminate(&self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!("Termination requested through handle: {}", reason);
        self.ctx.control.terminate(reason);
    }

    pub async fn kick(&self, connection: ConnectionId, reason: &str) -> Result<()> {
        self.ctx.connections.kick(connection, reason).await
    }

    pub async fn kick_for(
        &self,
        connection: ConnectionId,
        reason: &str,
        duration: std::time::Duration,
    ) -> Result<()> {
        self.ctx.connections.kick_for(connection, reason, duration).await
    }

    pub async fn ban_player(
        &self,
        player: &Player,
        reason: &str,
        moderator: &str,
        options: BanOptions,
    ) -> Result<Ban> {
        self.ctx
            .moderation
            .ban_player(player, reason, moderator, options)
            .await
    }

    pub async fn add_ban(&self, ban: Ban, reload: bool) -> Result<Ban> {
        self.ctx.moderation.add_ban(ban, reload).await
    }

    pub async fn refresh_listing(&self) -> Result<Reconciliation> {
        self.ctx.connections.refresh_listing().await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::default_monitors;
    use crate::control::UNKNOWN_SHUTDOWN_REASON;
    use crate::events::BroadcastSink;
    use crate::monitors::standard_catalog;
    use crate::settings::MemorySettingsStore;
    use crate::store::MemoryStore;
    use crate::testing::RecordingCommands;
    use std::path::PathBuf;
    use warden_core::WardenError;
    use std::time::Duration;

    struct Fixture {
        server: Server,
        settings_store: Arc<MemorySettingsStore>,
        store: Arc<MemoryStore>,
        sink: Arc<BroadcastSink>,
    }

    fn fixture(script: &str) -> Fixture {
        fixture_with("/bin/sh", script)
    }

    fn fixture_with(executable: &str, script: &str) -> Fixture {
        let config = ServerConfig {
            executable: PathBuf::from(executable),
            args: vec!["-c".to_string(), script.to_string()],
            kill_timeout_secs: 5,
            ..Default::default()
        };
        let settings_store = Arc::new(MemorySettingsStore::default());
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(BroadcastSink::new(64));
        let collaborators = Collaborators {
            commands: Arc::new(RecordingCommands::default()),
            store: store.clone(),
            settings_store: settings_store.clone(),
            sink: sink.clone(),
        };
        let server = Server::new(
            config,
            &ConnectionsConfig::default(),
            &default_monitors(),
            collaborators,
            &standard_catalog(),
        )
        .unwrap();
        Fixture {
            server,
            settings_store,
            store,
            sink,
        }
    }

    #[tokio::test]
    async fn test_monitor_termination_stops_process() {
        let mut fixture = fixture(
            "echo '[Info] Server version 1.4.4'; echo '[Error] Fatal Error: boom'; exec sleep 30",
        );
        let reason = fixture.server.run().await.unwrap();
        assert_eq!(reason, "Fatal Exception: [Error] Fatal Error: boom");

        let handle = fixture.server.handle();
        assert!(!handle.is_running());
        let stats = handle.statistics().await;
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.last_shutdown_reason.as_deref(), Some(reason.as_str()));
        assert!(stats.ended_at.is_some());
        assert_eq!(stats.connections, 0);

        let uptimes = fixture.store.uptimes().await;
        assert_eq!(uptimes.len(), 1);
        assert_eq!(uptimes[0].reason, reason);
    }

    #[tokio::test]
    async fn test_natural_exit_has_unknown_reason() {
        let mut fixture = fixture("echo '[Info] Server version 1.4.4'");
        let mut events = fixture.sink.subscribe();
        let reason = fixture.server.run().await.unwrap();
        assert_eq!(reason, UNKNOWN_SHUTDOWN_REASON);

        let mut names_seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            names_seen.push(event.name);
        }
        assert_eq!(names_seen.first().map(String::as_str), Some(names::SERVER_START));
        assert_eq!(names_seen.last().map(String::as_str), Some(names::SERVER_EXIT));
    }

    #[tokio::test]
    async fn test_external_termination_and_restart() {
        let mut fixture = fixture("echo '[Info] up'; exec sleep 30");
        let handle = fixture.server.handle();

        let stopper = {
            let handle = handle.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    if handle.is_running() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                handle.terminate("Operator restart");
            })
        };
        assert_eq!(fixture.server.run().await.unwrap(), "Operator restart");
        stopper.await.unwrap();

        // The next run starts fresh
        let stopper = {
            let handle = handle.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                handle.terminate("Again");
            })
        };
        assert_eq!(fixture.server.run().await.unwrap(), "Again");
        stopper.await.unwrap();
        assert_eq!(handle.statistics().await.runs, 2);

        fixture.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_settings_written_before_start() {
        let mut fixture = fixture("true");
        fixture
            .settings_store
            .save(&warden_core::ServerSettings {
                server_name: "Before".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        fixture
            .store
            .save_ban(Ban::new(Some("6.6.6.6".into()), None, "x", "m"))
            .await
            .unwrap();

        fixture.server.run().await.unwrap();
        let saved = fixture.settings_store.load().await.unwrap();
        assert_eq!(saved.server_name, "Before");
        assert_eq!(saved.banned_ips, vec!["6.6.6.6".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let mut fixture = fixture_with("/no/such/starbound_server", "true");
        assert!(matches!(
            fixture.server.run().await,
            Err(WardenError::Process(_))
        ));
        assert!(!fixture.server.handle().is_running());
        assert!(fixture.server.handle().control().ended_at().is_some());
    }

    #[tokio::test]
    async fn test_bare_executable_name_is_found_on_path() {
        let mut fixture = fixture_with("sh", "echo '[Info] up'");
        let reason = fixture.server.run().await.unwrap();
        assert_eq!(reason, UNKNOWN_SHUTDOWN_REASON);
        assert_eq!(fixture.server.handle().statistics().await.runs, 1);
    }
}
