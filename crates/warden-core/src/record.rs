//! Session and uptime records kept by the persistence layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::player::{ConnectionId, Player};

/// One player connection, from connect to disconnect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: u64,
    pub connection_id: ConnectionId,
    pub username: String,
    pub account: Option<String>,
    pub ip: Option<String>,
    pub uuid: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn open(id: u64, player: &Player) -> Self {
        Self {
            id,
            connection_id: player.connection_id,
            username: player.username.clone(),
            account: player.account.clone(),
            ip: player.ip.clone(),
            uuid: player.uuid.clone(),
            connected_at: Utc::now(),
            disconnected_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.disconnected_at.is_none()
    }
}

/// One run of the game server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uptime {
    pub id: u64,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub reason: String,
    /// Last lines seen before the server went down
    pub last_log: String,
}

impl Uptime {
    pub fn start(id: u64) -> Self {
        Self {
            id,
            started: Utc::now(),
            ended: None,
            reason: String::new(),
            last_log: String::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended.is_none()
    }
}
