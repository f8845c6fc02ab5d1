//! Warden
//!
//! Keeps a Starbound dedicated server running:
//! - Starts the server and feeds its log through the monitors
//! - Restarts it after every exit, unless `--once` is given
//! - Optionally streams supervisor events to stdout as JSON lines

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use warden_core::ServerSettings;
use warden_rcon::StarboundCommands;
use warden_server::{
    BroadcastSink, Collaborators, Event, JsonSettingsStore, MemoryStore, Server, SettingsStore,
    standard_catalog,
};

use crate::config::WardenConfig;

const OPERATOR_SHUTDOWN_REASON: &str = "Stopped by operator";

#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Supervisor for a Starbound dedicated server")]
struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "FILE", default_value = "warden.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the configuration
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Write supervisor events to stdout as JSON lines
    #[arg(long)]
    events_stdout: bool,

    /// Exit after the first run instead of restarting
    #[arg(long)]
    once: bool,
}

/// Print every event as one JSON line
async fn forward_events(mut rx: broadcast::Receiver<Event>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize event {}: {}", event.name, e),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event stream lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = WardenConfig::load(&args.config)?;

    let level = args.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Warden starting with {}", args.config.display());

    let settings_store = Arc::new(JsonSettingsStore::new(config.server.settings_path.clone()));
    let game_settings = match settings_store.load().await {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Could not read the game settings ({}), using defaults", e);
            ServerSettings::default()
        }
    };
    let (address, password) = config.rcon.resolve(&game_settings);
    info!("RCON at {}", address);

    let sink = Arc::new(BroadcastSink::new(256));
    if args.events_stdout {
        tokio::spawn(forward_events(sink.subscribe()));
    }

    let collaborators = Collaborators {
        commands: Arc::new(StarboundCommands::from_config(&config.rcon, address, password)),
        store: Arc::new(MemoryStore::new().with_admins(config.admins.clone())),
        settings_store,
        sink,
    };
    let mut server = Server::new(
        config.server.clone(),
        &config.connections,
        &config.monitors(),
        collaborators,
        &standard_catalog(),
    )
    .context("Failed to set up the server")?;

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    let handle = server.handle();
    let signal_stop = stop_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, stopping");
                let _ = signal_stop.send(true);
                handle.terminate(OPERATOR_SHUTDOWN_REASON);
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let delay = config.server.restart_delay();
    loop {
        if *stop_rx.borrow() {
            break;
        }
        match server.run().await {
            Ok(reason) => info!("Run ended: {}", reason),
            Err(e) => error!("Run failed: {}", e),
        }
        if args.once || *stop_rx.borrow() {
            break;
        }

        info!("Restarting in {:?}", delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => {}
        }
    }

    server.shutdown().await;
    info!("Warden stopped");
    Ok(())
}
