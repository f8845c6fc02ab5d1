//! Flood detection with a decaying tally
//!
//! Every watched message adds `weight` to the tally of its (lowercased)
//! content. Tallies decay by one for every whole `decay_interval` that
//! passes. Reaching `threshold * weight` means the same text arrived about
//! `threshold` times within one decay window, which is treated as an
//! attack: anonymous connections are disabled and the server restarts.

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};
use warden_core::{Level, Message};

use crate::collaborators::EventSink;
use crate::events::names;
use crate::monitor::{Monitor, MonitorContext, Verdict};
use crate::settings::SettingsManager;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpamConfig {
    /// Repetitions within one decay window that trigger mitigation
    pub threshold: i64,
    pub weight: i64,
    pub decay_interval_ms: u64,
    /// Level letters to watch (`C`, `I`, `W`, `E`)
    pub levels: String,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            weight: 3,
            decay_interval_ms: 1000,
            levels: "C".to_string(),
        }
    }
}

/// Per-content tallies that decay over time
pub struct TallyBook {
    tallies: HashMap<String, i64>,
    weight: i64,
    decay_interval: Duration,
    last_decay: Option<Instant>,
}

impl TallyBook {
    pub fn new(weight: i64, decay_interval: Duration) -> Self {
        Self {
            tallies: HashMap::new(),
            weight: weight.max(1),
            decay_interval: decay_interval.max(Duration::from_millis(1)),
            last_decay: None,
        }
    }

    /// Decay, then count one more occurrence of `content`. Returns its tally.
    pub fn observe(&mut self, content: &str, now: Instant) -> i64 {
        self.decay(now);
        let tally = self.tallies.entry(tally_key(content)).or_insert(0);
        *tally += self.weight;
        *tally
    }

    /// Apply every whole decay tick elapsed since the last decay
    pub fn decay(&mut self, now: Instant) {
        let Some(last) = self.last_decay else {
            self.last_decay = Some(now);
            return;
        };

        let elapsed = now.saturating_duration_since(last);
        let ticks = elapsed.as_nanos() / self.decay_interval.as_nanos();
        if ticks == 0 {
            return;
        }

        // Keep the remainder so partial ticks are not lost
        let ticks_u32 = u32::try_from(ticks).unwrap_or(u32::MAX);
        self.last_decay = Some(
            last.checked_add(self.decay_interval.saturating_mul(ticks_u32))
                .unwrap_or(now),
        );

        let ticks = i64::try_from(ticks).unwrap_or(i64::MAX);
        self.tallies.retain(|_, tally| {
            *tally = tally.saturating_sub(ticks);
            *tally > 0
        });
    }

    pub fn get(&self, content: &str) -> i64 {
        self.tallies.get(&tally_key(content)).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.tallies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tallies.is_empty()
    }

    pub fn clear(&mut self) {
        self.tallies.clear();
    }
}

fn tally_key(content: &str) -> String {
    hex::encode(Sha256::digest(content.to_lowercase().as_bytes()))
}

pub struct SpamMonitor {
    settings: Arc<SettingsManager>,
    sink: Arc<dyn EventSink>,
    book: TallyBook,
    trigger: i64,
    levels: Vec<Level>,
}

impl SpamMonitor {
    pub fn new(ctx: &MonitorContext, config: SpamConfig) -> Self {
        let book = TallyBook::new(config.weight, Duration::from_millis(config.decay_interval_ms));
        let trigger = config.threshold.max(1).saturating_mul(book.weight);
        let levels = [Level::Chat, Level::Info, Level::Warning, Level::Error]
            .into_iter()
            .filter(|level| config.levels.contains(level.letter()))
            .collect();
        Self {
            settings: ctx.settings.clone(),
            sink: ctx.sink.clone(),
            book,
            trigger,
            levels,
        }
    }

    async fn mitigate(&mut self, message: &Message) -> String {
        error!("Preemptive attack detected: {}", message);
        self.settings
            .update(|settings| settings.allow_anonymous_connections = false)
            .await;
        if let Err(e) = self.settings.save(false).await {
            warn!("Failed to save settings during mitigation: {}", e);
        }
        self.sink.publish(
            names::SPAM_MITIGATION,
            serde_json::json!({ "message": message.to_string() }),
        );
        self.book.clear();
        format!("Preemptive attack mitigation: {}", message.content)
    }
}

#[async_trait]
impl Monitor for SpamMonitor {
    fn name(&self) -> &str {
        "spam"
    }

    fn priority(&self) -> i32 {
        11
    }

    async fn handle_message(&mut self, message: &Message) -> Verdict {
        if !self.levels.contains(&message.level) {
            return Verdict::Continue;
        }
        let total = self.book.observe(&message.content, Instant::now());
        if total >= self.trigger {
            return Verdict::Terminate(self.mitigate(message).await);
        }
        Verdict::Continue
    }
}
