//! # warden-core
//!
//! Core types for the Warden game-server supervisor.
//!
//! This crate provides the types shared by the supervisor and its collaborators:
//! - Log messages and the line parser
//! - Players, pending logins and server listings
//! - Bans, ban types and ticket sequences
//! - The game server's configuration file model
//! - Session and uptime records

pub mod ban;
pub mod error;
pub mod message;
pub mod player;
pub mod record;
pub mod settings;

pub use ban::{Ban, BanType, TicketSequence};
pub use error::{Result, WardenError};
pub use message::{Level, Message, split_entries};
pub use player::{ConnectionId, ListedPlayer, PendingLogin, Player};
pub use record::{Session, Uptime};
pub use settings::ServerSettings;
