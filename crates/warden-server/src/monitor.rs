//! Monitor trait and the ordered pipeline that drives monitors
//!
//! Every message is offered to every monitor in priority order. A monitor
//! asking for termination does not stop later monitors from seeing the
//! message; the first reason given is returned once all of them ran.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use warden_core::{Message, Result, WardenError};

use crate::collaborators::{EventSink, Store};
use crate::config::MonitorEntry;
use crate::connections::Connections;
use crate::control::ServerControl;
use crate::moderation::Moderation;
use crate::settings::SettingsManager;

/// Priority of monitors that do not pick one
pub const DEFAULT_PRIORITY: i32 = 100;

/// Outcome of handling one message
#[derive(Debug)]
pub enum Verdict {
    Continue,
    /// Stop the server once every monitor has seen the message
    Terminate(String),
    /// The monitor failed; logged and otherwise ignored
    Faulted(WardenError),
}

impl From<Result<()>> for Verdict {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Verdict::Continue,
            Err(e) => Verdict::Faulted(e),
        }
    }
}

/// A reactive policy fed with every log message
#[async_trait]
pub trait Monitor: Send + 'static {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Lower runs first
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    /// Called once when the pipeline is built
    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once when the supervisor shuts down
    async fn deinitialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Before the configuration is written and the process started
    async fn on_server_pre_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// After the process started
    async fn on_server_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// After the process ended
    async fn on_server_exit(&mut self, _reason: &str) -> Result<()> {
        Ok(())
    }

    /// React to one log message
    async fn handle_message(&mut self, message: &Message) -> Verdict;
}

/// Shared services handed to monitor constructors
#[derive(Clone)]
pub struct MonitorContext {
    pub connections: Arc<Connections>,
    pub moderation: Arc<Moderation>,
    pub settings: Arc<SettingsManager>,
    pub store: Arc<dyn Store>,
    pub sink: Arc<dyn EventSink>,
    pub control: ServerControl,
}

/// Builds a monitor from the shared context and its settings table
pub type MonitorFactory =
    Box<dyn Fn(&MonitorContext, &toml::Table) -> Result<Box<dyn Monitor>> + Send + Sync>;

/// Registration table from configuration key to constructor
#[derive(Default)]
pub struct MonitorCatalog {
    factories: HashMap<String, MonitorFactory>,
}

impl MonitorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under a configuration key
    pub fn register<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&MonitorContext, &toml::Table) -> Result<Box<dyn Monitor>> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Box::new(factory));
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Build the pipeline for the configured monitors
    pub fn build(&self, entries: &[MonitorEntry], ctx: &MonitorContext) -> Result<Pipeline> {
        let mut pipeline = Pipeline::new();
        for entry in entries {
            let factory = self.factories.get(&entry.key).ok_or_else(|| {
                WardenError::Config(format!(
                    "Unknown monitor '{}' (known: {})",
                    entry.key,
                    self.keys().join(", ")
                ))
            })?;
            let monitor = factory(ctx, &entry.settings)?;
            pipeline.push(monitor, entry.priority);
        }
        Ok(pipeline)
    }
}

struct Registered {
    priority: i32,
    monitor: Box<dyn Monitor>,
}

/// Monitors ordered by ascending priority, ties in registration order
#[derive(Default)]
pub struct Pipeline {
    monitors: Vec<Registered>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a monitor, optionally overriding its priority
    pub fn push(&mut self, monitor: Box<dyn Monitor>, priority: Option<i32>) {
        let priority = priority.unwrap_or_else(|| monitor.priority());
        debug!("Registered monitor {} (priority {})", monitor.name(), priority);
        self.monitors.push(Registered { priority, monitor });
        // Stable, so equal priorities keep registration order
        self.monitors.sort_by_key(|r| r.priority);
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// Monitor names in dispatch order
    pub fn names(&self) -> Vec<&str> {
        self.monitors.iter().map(|r| r.monitor.name()).collect()
    }

    /// Offer a message to every monitor.
    ///
    /// Returns the first termination reason, if any monitor asked for one.
    pub async fn dispatch(&mut self, message: &Message) -> Option<String> {
        let mut termination = None;
        for registered in &mut self.monitors {
            match registered.monitor.handle_message(message).await {
                Verdict::Continue => {}
                Verdict::Terminate(reason) => {
                    info!(
                        "Monitor {} requested termination: {}",
                        registered.monitor.name(),
                        reason
                    );
                    if termination.is_none() {
                        termination = Some(reason);
                    }
                }
                Verdict::Faulted(e) => {
                    error!(
                        "Monitor {} failed on '{}': {}",
                        registered.monitor.name(),
                        message,
                        e
                    );
                }
            }
        }
        termination
    }

    pub async fn initialize(&mut self) {
        for registered in &mut self.monitors {
            let result = registered.monitor.initialize().await;
            log_hook(registered.monitor.name(), "initialize", result);
        }
    }

    pub async fn deinitialize(&mut self) {
        for registered in &mut self.monitors {
            let result = registered.monitor.deinitialize().await;
            log_hook(registered.monitor.name(), "deinitialize", result);
        }
    }

    pub async fn server_pre_start(&mut self) {
        for registered in &mut self.monitors {
            let result = registered.monitor.on_server_pre_start().await;
            log_hook(registered.monitor.name(), "pre-start", result);
        }
    }

    pub async fn server_start(&mut self) {
        for registered in &mut self.monitors {
            let result = registered.monitor.on_server_start().await;
            log_hook(registered.monitor.name(), "start", result);
        }
    }

    pub async fn server_exit(&mut self, reason: &str) {
        for registered in &mut self.monitors {
            let result = registered.monitor.on_server_exit(reason).await;
            log_hook(registered.monitor.name(), "exit", result);
        }
    }
}

fn log_hook(name: &str, hook: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!("Monitor {} failed during {}: {}", name, hook, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use warden_core::Level;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Scripted {
        name: String,
        priority: i32,
        log: Log,
        verdict: fn() -> Verdict,
    }

    #[async_trait]
    impl Monitor for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn on_server_exit(&mut self, reason: &str) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:exit:{}", self.name, reason));
            Err(WardenError::Persistence("down".to_string()))
        }

        async fn handle_message(&mut self, _message: &Message) -> Verdict {
            self.log.lock().unwrap().push(self.name.clone());
            (self.verdict)()
        }
    }

    fn scripted(name: &str, priority: i32, log: &Log, verdict: fn() -> Verdict) -> Box<dyn Monitor> {
        Box::new(Scripted {
            name: name.to_string(),
            priority,
            log: log.clone(),
            verdict,
        })
    }

    fn message() -> Message {
        Message::new(Level::Info, "hello")
    }

    #[tokio::test]
    async fn test_every_monitor_sees_message() {
        let log: Log = Arc::default();
        let mut pipeline = Pipeline::new();
        pipeline.push(scripted("late", 50, &log, || Verdict::Continue), None);
        pipeline.push(scripted("stopper", 10, &log, || Verdict::Terminate("first".into())), None);
        pipeline.push(
            scripted("broken", 20, &log, || {
                Verdict::Faulted(WardenError::Command("rcon down".into()))
            }),
            None,
        );
        pipeline.push(scripted("second", 30, &log, || Verdict::Terminate("second".into())), None);

        let reason = pipeline.dispatch(&message()).await;
        assert_eq!(reason.as_deref(), Some("first"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["stopper", "broken", "second", "late"]
        );
    }

    #[tokio::test]
    async fn test_ties_keep_registration_order_and_overrides_apply() {
        let log: Log = Arc::default();
        let mut pipeline = Pipeline::new();
        pipeline.push(scripted("a", 5, &log, || Verdict::Continue), None);
        pipeline.push(scripted("b", 5, &log, || Verdict::Continue), None);
        pipeline.push(scripted("c", 99, &log, || Verdict::Continue), Some(0));

        assert_eq!(pipeline.names(), vec!["c", "a", "b"]);
        assert_eq!(pipeline.dispatch(&message()).await, None);
    }

    #[tokio::test]
    async fn test_hook_failures_do_not_stop_others() {
        let log: Log = Arc::default();
        let mut pipeline = Pipeline::new();
        pipeline.push(scripted("a", 1, &log, || Verdict::Continue), None);
        pipeline.push(scripted("b", 2, &log, || Verdict::Continue), None);

        pipeline.server_exit("crash").await;
        assert_eq!(*log.lock().unwrap(), vec!["a:exit:crash", "b:exit:crash"]);
    }

    #[tokio::test]
    async fn test_catalog_builds_configured_monitors() {
        let harness = crate::testing::Harness::new();
        let catalog = MonitorCatalog::new()
            .register("quiet", |_ctx, _settings| {
                let log: Log = Arc::default();
                Ok(scripted("quiet", 7, &log, || Verdict::Continue))
            });

        let mut entry = MonitorEntry::new("quiet");
        entry.priority = Some(3);
        let pipeline = catalog.build(&[entry], &harness.ctx).unwrap();
        assert_eq!(pipeline.names(), vec!["quiet"]);

        let missing = catalog.build(&[MonitorEntry::new("nope")], &harness.ctx);
        assert!(matches!(missing, Err(WardenError::Config(_))));
    }

    #[test]
    fn test_verdict_from_result() {
        assert!(matches!(Verdict::from(Ok(())), Verdict::Continue));
        assert!(matches!(
            Verdict::from(Err(WardenError::Io("x".into()))),
            Verdict::Faulted(_)
        ));
    }
}
