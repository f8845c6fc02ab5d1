//! World thread failures
//!
//! Reports every exception a world thread raises while handling a client's
//! packets. I/O failures leave the world thread unusable, so those restart
//! the server. The client is never punished here.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, warn};
use warden_core::{ConnectionId, Level, Message};

use crate::collaborators::EventSink;
use crate::connections::Connections;
use crate::events::names;
use crate::monitor::{Monitor, MonitorContext, Verdict};
use crate::monitors::disagreement::DISAGREEMENT_PREFIX;

pub const IO_EXCEPTION_MARKER: &str = "(IOException)";
pub const WORLD_THREAD_SHUTDOWN_REASON: &str = "World Thread Exception - IO Exception";

pub struct WorldThreadMonitor {
    connections: Arc<Connections>,
    sink: Arc<dyn EventSink>,
}

/// Split `<client>: <exception>` into its parts
fn split_report(rest: &str) -> (Option<ConnectionId>, &str) {
    match rest.split_once(':') {
        Some((client, exception)) => (client.trim().parse().ok(), exception.trim()),
        None => (None, rest.trim()),
    }
}

impl WorldThreadMonitor {
    pub fn new(ctx: &MonitorContext) -> Self {
        Self {
            connections: ctx.connections.clone(),
            sink: ctx.sink.clone(),
        }
    }
}

#[async_trait]
impl Monitor for WorldThreadMonitor {
    fn name(&self) -> &str {
        "world_thread"
    }

    fn priority(&self) -> i32 {
        50
    }

    async fn handle_message(&mut self, message: &Message) -> Verdict {
        if message.level != Level::Error {
            return Verdict::Continue;
        }
        let Some(rest) = message.content.strip_prefix(DISAGREEMENT_PREFIX) else {
            return Verdict::Continue;
        };

        let (client, exception) = split_report(rest);
        let player = match client {
            Some(id) => self.connections.registry().get(id).await,
            None => {
                warn!("World thread exception without a client id: {}", rest);
                None
            }
        };

        self.sink.publish(
            names::WORLD_THREAD_EXCEPTION,
            serde_json::json!({
                "message": message.to_string(),
                "exception": exception,
                "player": player,
            }),
        );

        if exception.contains(IO_EXCEPTION_MARKER) {
            error!("World thread I/O failure: {}", exception);
            return Verdict::Terminate(WORLD_THREAD_SHUTDOWN_REASON.to_string());
        }
        Verdict::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, connect};

    fn world_error(client: &str, exception: &str) -> Message {
        Message::parse(&format!("[Error] {} {}: {}", DISAGREEMENT_PREFIX, client, exception))
    }

    #[test]
    fn test_split_report() {
        assert_eq!(split_report(" 4: (IOException) gone"), (Some(4), "(IOException) gone"));
        assert_eq!(split_report(" x: boom"), (None, "boom"));
        assert_eq!(split_report(" nothing"), (None, "nothing"));
    }

    #[tokio::test]
    async fn test_io_exception_restarts() {
        let mut harness = Harness::new();
        connect(&harness.ctx.connections, 4, "Bob", "10.0.0.4").await;
        let mut monitor = WorldThreadMonitor::new(&harness.ctx);

        match monitor
            .handle_message(&world_error("4", "(IOException) Connection reset"))
            .await
        {
            Verdict::Terminate(reason) => assert_eq!(reason, WORLD_THREAD_SHUTDOWN_REASON),
            other => panic!("unexpected verdict {:?}", other),
        }
        assert!(harness.event_names().contains(&names::WORLD_THREAD_EXCEPTION.to_string()));
        assert!(harness.commands.kicks().is_empty());
    }

    #[tokio::test]
    async fn test_other_exceptions_are_only_reported() {
        let mut harness = Harness::new();
        let mut monitor = WorldThreadMonitor::new(&harness.ctx);

        let verdict = monitor
            .handle_message(&world_error("7", "(StarException) Unknown item"))
            .await;
        assert!(matches!(verdict, Verdict::Continue));
        assert_eq!(harness.event_names(), vec![names::WORLD_THREAD_EXCEPTION.to_string()]);

        let info = Message::parse(&format!("[Info] {} 7: (IOException) x", DISAGREEMENT_PREFIX));
        assert!(matches!(monitor.handle_message(&info).await, Verdict::Continue));
    }
}
