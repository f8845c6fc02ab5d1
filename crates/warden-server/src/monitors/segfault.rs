//! Restarts the server after a fatal error

use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;
use warden_core::{Level, Message};

use crate::collaborators::EventSink;
use crate::events::names;
use crate::monitor::{Monitor, MonitorContext, Verdict};

pub const FATAL_ERROR_PREFIX: &str = "Fatal Error: ";

pub struct SegfaultMonitor {
    sink: Arc<dyn EventSink>,
}

impl SegfaultMonitor {
    pub fn new(ctx: &MonitorContext) -> Self {
        Self {
            sink: ctx.sink.clone(),
        }
    }
}

#[async_trait]
impl Monitor for SegfaultMonitor {
    fn name(&self) -> &str {
        "segfault"
    }

    fn priority(&self) -> i32 {
        50
    }

    async fn handle_message(&mut self, message: &Message) -> Verdict {
        if message.level != Level::Error || !message.content.starts_with(FATAL_ERROR_PREFIX) {
            return Verdict::Continue;
        }

        error!("Fatal error has occurred: {}", message);
        self.sink.publish(
            names::SEGFAULT_CRASH,
            serde_json::json!({ "message": message.to_string() }),
        );
        Verdict::Terminate(format!("Fatal Exception: {}", message))
    }
}
