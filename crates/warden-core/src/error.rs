//! Error types for Warden

use thiserror::Error;

use crate::player::ConnectionId;

/// Result type for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

/// Warden error types
#[derive(Debug, Error)]
pub enum WardenError {
    /// Child process could not be started, stopped or inspected
    #[error("Process error: {0}")]
    Process(String),

    /// Command channel (RCON) failure or rejected command
    #[error("Command error: {0}")]
    Command(String),

    /// Malformed data on the command channel
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Persistence collaborator failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Server settings could not be loaded or saved
    #[error("Settings error: {0}")]
    Settings(String),

    /// Ban rejected before persistence
    #[error("Invalid ban: {0}")]
    InvalidBan(String),

    /// Moderation targeted a connection that is not in the registry
    #[error("Cannot kick a player (CID: {0}) that isn't connected.")]
    NotConnected(ConnectionId),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for WardenError {
    fn from(err: serde_json::Error) -> Self {
        WardenError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for WardenError {
    fn from(err: std::io::Error) -> Self {
        WardenError::Io(err.to_string())
    }
}
