//! Event sinks and event names

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::collaborators::EventSink;

/// Event names published by the supervisor
pub mod names {
    pub const PLAYER_CONNECT: &str = "OnPlayerConnect";
    pub const PLAYER_DISCONNECT: &str = "OnPlayerDisconnect";
    pub const PLAYER_UPDATE: &str = "OnPlayerUpdate";
    pub const BAN: &str = "OnBan";
    pub const KICK: &str = "OnKick";
    pub const SERVER_START: &str = "OnServerStart";
    pub const SERVER_EXIT: &str = "OnServerExit";
    pub const RACE_CRASH: &str = "OnCustomRaceCrash";
    pub const INVALID_COORDINATE: &str = "OnInvalidCoordinate";
    pub const SEGFAULT_CRASH: &str = "OnSegfaultCrash";
    pub const DISAGREEMENT_CRASH: &str = "OnDisagreementCrash";
    pub const UDP_CRASH: &str = "OnUdpCrash";
    pub const SPAM_MITIGATION: &str = "OnSpamMitigation";
    pub const WORLD_THREAD_EXCEPTION: &str = "OnWorldThreadException";
}

/// An event as seen by subscribers
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub name: String,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// Sink that fans events out to any number of subscribers
pub struct BroadcastSink {
    tx: broadcast::Sender<Event>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: &str, payload: serde_json::Value) {
        let event = Event {
            name: event.to_string(),
            payload,
            at: Utc::now(),
        };
        // No subscribers is fine
        if self.tx.send(event).is_err() {
            debug!("No subscribers for event");
        }
    }
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &str, _payload: serde_json::Value) {}
}
