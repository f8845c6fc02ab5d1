//! # warden-rcon
//!
//! Command channel into a running Starbound server.
//!
//! This crate provides:
//! - `RconClient`, a Source RCON client over a persistent TCP connection
//! - `StarboundCommands`, the Starbound command set behind `CommandClient`
//! - `RconConfig`, the `[rcon]` configuration table

pub mod commands;
pub mod config;
pub mod rcon;

pub use commands::{StarboundCommands, parse_listing};
pub use config::RconConfig;
pub use rcon::{RconClient, RconError, RconPacket};
