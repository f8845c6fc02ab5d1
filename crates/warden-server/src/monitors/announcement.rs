//! Periodic broadcasts to every player while the server runs

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use warden_core::{Message, Result, WardenError};

use crate::collaborators::CommandClient;
use crate::monitor::{Monitor, MonitorContext, Verdict};

/// One message and how often to send it
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Announcement {
    pub message: String,
    pub interval_secs: f64,
    pub enabled: bool,
}

impl Default for Announcement {
    fn default() -> Self {
        Self {
            message: String::new(),
            interval_secs: 1800.0,
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnnouncementConfig {
    pub announcements: Vec<Announcement>,
}

pub struct AnnouncementMonitor {
    commands: Arc<dyn CommandClient>,
    /// Enabled announcements with their period
    schedule: Vec<(String, Duration)>,
    tasks: Vec<JoinHandle<()>>,
}

impl AnnouncementMonitor {
    pub fn new(ctx: &MonitorContext, config: AnnouncementConfig) -> Result<Self> {
        let mut schedule = Vec::new();
        for announcement in config.announcements.into_iter().filter(|a| a.enabled) {
            let period = Duration::try_from_secs_f64(announcement.interval_secs)
                .ok()
                .filter(|period| !period.is_zero())
                .ok_or_else(|| {
                    WardenError::Config(format!(
                        "Invalid announcement interval {} for '{}'",
                        announcement.interval_secs, announcement.message
                    ))
                })?;
            schedule.push((announcement.message, period));
        }
        Ok(Self {
            commands: ctx.connections.commands().clone(),
            schedule,
            tasks: Vec::new(),
        })
    }

    /// Number of enabled announcements
    pub fn scheduled(&self) -> usize {
        self.schedule.len()
    }

    fn stop_all(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl Monitor for AnnouncementMonitor {
    fn name(&self) -> &str {
        "announcement"
    }

    fn priority(&self) -> i32 {
        10
    }

    async fn on_server_start(&mut self) -> Result<()> {
        self.stop_all();
        for (id, (message, period)) in self.schedule.iter().enumerate() {
            let commands = self.commands.clone();
            let message = message.clone();
            let period = *period;
            debug!("Announcement #{} every {:?}", id, period);

            self.tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    match commands.broadcast(&message).await {
                        Ok(response) if response.success => {}
                        Ok(response) => {
                            error!("Failed to send announcement #{}: {}", id, response.message)
                        }
                        Err(e) => error!("Failed to send announcement #{}: {}", id, e),
                    }
                }
            }));
        }
        if !self.tasks.is_empty() {
            info!("Started {} announcements", self.tasks.len());
        }
        Ok(())
    }

    async fn on_server_exit(&mut self, _reason: &str) -> Result<()> {
        self.stop_all();
        Ok(())
    }

    async fn deinitialize(&mut self) -> Result<()> {
        self.stop_all();
        Ok(())
    }

    async fn handle_message(&mut self, _message: &Message) -> Verdict {
        Verdict::Continue
    }
}

impl Drop for AnnouncementMonitor {
    fn drop(&mut self) {
        self.stop_all();
    }
}
