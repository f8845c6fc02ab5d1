//! Mirrors game log lines into tracing

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info, warn};
use warden_core::{Level, Message};

use crate::monitor::{Monitor, Verdict};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level letters to mirror (`C`, `I`, `W`, `E`)
    pub levels: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            levels: "CIWE".to_string(),
        }
    }
}

pub struct LogMonitor {
    levels: String,
}

impl LogMonitor {
    pub fn new(config: LogConfig) -> Self {
        Self {
            levels: config.levels.to_uppercase(),
        }
    }

    pub fn mirrors(&self, level: Level) -> bool {
        self.levels.contains(level.letter())
    }
}

#[async_trait]
impl Monitor for LogMonitor {
    fn name(&self) -> &str {
        "log"
    }

    fn priority(&self) -> i32 {
        10
    }

    async fn handle_message(&mut self, message: &Message) -> Verdict {
        if !self.mirrors(message.level) {
            return Verdict::Continue;
        }
        match message.level {
            Level::Chat => info!(
                target: "game",
                "<{}> {}",
                message.author.as_deref().unwrap_or_default(),
                message.content
            ),
            Level::Info => info!(target: "game", "{}", message.content),
            Level::Warning => warn!(target: "game", "{}", message.content),
            Level::Error => error!(target: "game", "{}", message.content),
        }
        Verdict::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_level_filter() {
        let mut monitor = LogMonitor::new(LogConfig {
            levels: "cw".to_string(),
        });
        assert!(monitor.mirrors(Level::Chat));
        assert!(monitor.mirrors(Level::Warning));
        assert!(!monitor.mirrors(Level::Info));
        assert!(!monitor.mirrors(Level::Error));

        let verdict = monitor.handle_message(&Message::chat("Bob", "hi")).await;
        assert!(matches!(verdict, Verdict::Continue));
    }
}
