//! Records how long each run lasted and how it ended

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};
use warden_core::{Message, Result};

use crate::collaborators::Store;
use crate::control::{ServerControl, UNKNOWN_SHUTDOWN_REASON};
use crate::monitor::{Monitor, MonitorContext, Verdict};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UptimeConfig {
    /// Log lines kept for the end-of-run record
    pub history: usize,
}

impl Default for UptimeConfig {
    fn default() -> Self {
        Self { history: 10 }
    }
}

pub struct UptimeMonitor {
    store: Arc<dyn Store>,
    control: ServerControl,
    history: usize,
    recent: VecDeque<String>,
    current: Option<u64>,
}

impl UptimeMonitor {
    pub fn new(ctx: &MonitorContext, config: UptimeConfig) -> Self {
        let history = config.history.max(1);
        Self {
            store: ctx.store.clone(),
            control: ctx.control.clone(),
            history,
            recent: VecDeque::with_capacity(history),
            current: None,
        }
    }

    /// Id of the open uptime record
    pub fn current(&self) -> Option<u64> {
        self.current
    }

    fn last_log(&self) -> String {
        self.recent.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    async fn close(&mut self, reason: &str) -> Result<()> {
        if let Some(id) = self.current.take() {
            self.store.end_uptime(id, reason, &self.last_log()).await?;
            info!("Uptime {} ended: {}", id, reason);
        }
        Ok(())
    }
}

#[async_trait]
impl Monitor for UptimeMonitor {
    fn name(&self) -> &str {
        "uptime"
    }

    fn priority(&self) -> i32 {
        11
    }

    async fn on_server_start(&mut self) -> Result<()> {
        // A run that never saw its exit hook
        let previous = self
            .control
            .last_shutdown_reason()
            .unwrap_or_else(|| UNKNOWN_SHUTDOWN_REASON.to_string());
        self.close(&previous).await?;

        let stale = self.store.close_open_uptimes(UNKNOWN_SHUTDOWN_REASON).await?;
        if stale > 0 {
            debug!("Closed {} stale uptime records", stale);
        }

        self.recent.clear();
        self.current = Some(self.store.start_uptime().await?);
        Ok(())
    }

    async fn on_server_exit(&mut self, reason: &str) -> Result<()> {
        self.close(reason).await
    }

    async fn handle_message(&mut self, message: &Message) -> Verdict {
        if self.recent.len() >= self.history {
            self.recent.pop_front();
        }
        self.recent.push_back(message.to_string());
        Verdict::Continue
    }
}
