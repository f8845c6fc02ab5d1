//! # warden-server
//!
//! Supervision of a Starbound dedicated server.
//!
//! This crate provides:
//! - `Supervisor` for the game server process and its log stream
//! - `ConnectionRegistry` and `Connections` for tracking players
//! - The `Monitor` trait, the registration catalog and the built-in monitors
//! - Moderation (bans, kicks) and configuration management
//! - `Server`, which ties it all together for one run at a time
//! - The collaborator traits and their in-process implementations

pub mod collaborators;
pub mod config;
pub mod connections;
pub mod control;
pub mod events;
pub mod moderation;
pub mod monitor;
pub mod monitors;
pub mod process;
pub mod registry;
pub mod server;
pub mod settings;
pub mod store;
pub mod vpn;

#[cfg(test)]
pub(crate) mod testing;

pub use collaborators::{CommandClient, CommandResponse, EventSink, SettingsStore, Store};
pub use config::{ConnectionsConfig, MonitorEntry, ServerConfig, default_monitors};
pub use connections::Connections;
pub use control::ServerControl;
pub use events::{BroadcastSink, Event, NullSink};
pub use moderation::{BanOptions, Moderation};
pub use monitor::{Monitor, MonitorCatalog, MonitorContext, Pipeline, Verdict};
pub use monitors::standard_catalog;
pub use process::{ProcessState, Supervisor};
pub use registry::{ConnectionEvent, ConnectionRegistry};
pub use server::{Collaborators, Server, ServerHandle, Statistics};
pub use settings::{JsonSettingsStore, MemorySettingsStore, SettingsManager};
pub use store::MemoryStore;
