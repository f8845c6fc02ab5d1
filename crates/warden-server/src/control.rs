//! Termination requests and run bookkeeping shared across tasks

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::info;

/// Reason recorded when a run ends without anyone giving one
pub const UNKNOWN_SHUTDOWN_REASON: &str = "Server closed for unknown reason";

#[derive(Debug, Default, Clone)]
struct RunTimes {
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    last_shutdown_reason: Option<String>,
}

/// Cloneable handle used to end the current run from anywhere
#[derive(Clone)]
pub struct ServerControl {
    terminate: Arc<watch::Sender<Option<String>>>,
    times: Arc<Mutex<RunTimes>>,
}

impl ServerControl {
    pub fn new() -> Self {
        let (terminate, _) = watch::channel(None);
        Self {
            terminate: Arc::new(terminate),
            times: Arc::new(Mutex::new(RunTimes::default())),
        }
    }

    /// Ask the current run to end. The first reason given wins.
    pub fn terminate(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.terminate.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            info!("Termination requested: {}", reason);
            *current = Some(reason);
            true
        });
    }

    /// Whether termination of the current run has been requested
    pub fn is_terminating(&self) -> bool {
        self.terminate.borrow().is_some()
    }

    /// Resolves with the reason once termination is requested
    pub async fn terminated(&self) -> String {
        let mut rx = self.terminate.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(reason) = current {
                return reason;
            }
            // The sender lives in self, so this cannot close while we wait
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Reset for a new run
    pub(crate) fn begin_run(&self) {
        self.terminate.send_replace(None);
        self.update(|times| {
            times.started_at = Some(Utc::now());
            times.ended_at = None;
        });
    }

    /// Close the run, returning the reason it ended
    pub(crate) fn end_run(&self) -> String {
        let requested = self.terminate.borrow().clone();
        let reason = requested.unwrap_or_else(|| UNKNOWN_SHUTDOWN_REASON.to_string());
        self.update(|times| {
            times.ended_at = Some(Utc::now());
            times.last_shutdown_reason = Some(reason.clone());
        });
        reason
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.read(|times| times.started_at)
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.read(|times| times.ended_at)
    }

    pub fn last_shutdown_reason(&self) -> Option<String> {
        self.read(|times| times.last_shutdown_reason.clone())
    }

    fn update(&self, f: impl FnOnce(&mut RunTimes)) {
        let mut times = self.times.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut times);
    }

    fn read<T>(&self, f: impl FnOnce(&RunTimes) -> T) -> T {
        let times = self.times.lock().unwrap_or_else(PoisonError::into_inner);
        f(&times)
    }
}

impl Default for ServerControl {
    fn default() -> Self {
        Self::new()
    }
}
