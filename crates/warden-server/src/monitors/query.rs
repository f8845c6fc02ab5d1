//! Periodic liveness check against the server's query port
//!
//! The game server can end up in a state where TCP clients still connect
//! but the UDP query server is dead. An `A2S_INFO` request is sent on every
//! interval; no answer within the timeout restarts the server.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warden_core::{Message, Result, WardenError};

use crate::collaborators::EventSink;
use crate::control::ServerControl;
use crate::events::names;
use crate::monitor::{Monitor, MonitorContext, Verdict};
use crate::settings::SettingsManager;

pub const UDP_SHUTDOWN_REASON: &str = "UDP Failed to respond";

/// Source engine `A2S_INFO` request
pub const QUERY_HANDSHAKE: &[u8] = b"\xFF\xFF\xFF\xFFTSource Engine Query\0";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub interval_secs: u64,
    pub timeout_ms: u64,
    /// Overrides the address derived from the server settings
    pub address: Option<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            timeout_ms: 1000,
            address: None,
        }
    }
}

/// Send the query handshake and wait for any reply. Returns the reply size.
pub async fn query_info(address: &str, timeout: Duration) -> Result<usize> {
    let bind = if address.starts_with('[') { "[::]:0" } else { "0.0.0.0:0" };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(address).await?;
    socket.send(QUERY_HANDSHAKE).await?;

    let mut buf = [0u8; 1400];
    match tokio::time::timeout(timeout, socket.recv(&mut buf)).await {
        Ok(Ok(size)) => Ok(size),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(WardenError::Protocol(format!(
            "No query response from {} within {:?}",
            address, timeout
        ))),
    }
}

pub struct QueryMonitor {
    settings: Arc<SettingsManager>,
    sink: Arc<dyn EventSink>,
    control: ServerControl,
    config: QueryConfig,
    task: Option<JoinHandle<()>>,
}

impl QueryMonitor {
    pub fn new(ctx: &MonitorContext, config: QueryConfig) -> Self {
        Self {
            settings: ctx.settings.clone(),
            sink: ctx.sink.clone(),
            control: ctx.control.clone(),
            config,
            task: None,
        }
    }

    fn stop_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl Monitor for QueryMonitor {
    fn name(&self) -> &str {
        "query"
    }

    async fn on_server_start(&mut self) -> Result<()> {
        self.stop_task();

        let settings = self.settings.current().await;
        let address = match &self.config.address {
            Some(address) => address.clone(),
            None if settings.run_query_server && settings.query_server_port != 0 => {
                settings.query_address()
            }
            None => {
                warn!("Query server is disabled, UDP checks will not run");
                return Ok(());
            }
        };

        let period = Duration::from_secs(self.config.interval_secs.max(1));
        let timeout = Duration::from_millis(self.config.timeout_ms.max(1));
        let sink = self.sink.clone();
        let control = self.control.clone();
        info!("Probing query server at {} every {:?}", address, period);

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                match query_info(&address, timeout).await {
                    Ok(size) => debug!("Query server answered with {} bytes", size),
                    Err(e) => {
                        warn!("Query server check failed: {}", e);
                        sink.publish(names::UDP_CRASH, serde_json::json!({ "address": address }));
                        control.terminate(UDP_SHUTDOWN_REASON);
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    async fn on_server_exit(&mut self, _reason: &str) -> Result<()> {
        self.stop_task();
        Ok(())
    }

    async fn deinitialize(&mut self) -> Result<()> {
        self.stop_task();
        Ok(())
    }

    async fn handle_message(&mut self, _message: &Message) -> Verdict {
        Verdict::Continue
    }
}

impl Drop for QueryMonitor {
    fn drop(&mut self) {
        self.stop_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    async fn responder() -> (String, JoinHandle<Vec<u8>>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = socket.local_addr().unwrap().to_string();
        let task = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (size, from) = socket.recv_from(&mut buf).await.unwrap();
            socket.send_to(b"\xFF\xFF\xFF\xFFIinfo", from).await.unwrap();
            buf[..size].to_vec()
        });
        (address, task)
    }

    #[tokio::test]
    async fn test_query_sends_handshake() {
        let (address, server) = responder().await;
        let size = query_info(&address, Duration::from_secs(2)).await.unwrap();
        assert_eq!(size, 9);
        assert_eq!(server.await.unwrap(), QUERY_HANDSHAKE.to_vec());
    }

    #[tokio::test]
    async fn test_query_times_out() {
        // Bound but silent
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = silent.local_addr().unwrap().to_string();
        assert!(query_info(&address, Duration::from_millis(100)).await.is_err());
    }

    #[tokio::test]
    async fn test_silent_query_server_terminates() {
        let mut harness = Harness::new();
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = QueryConfig {
            interval_secs: 1,
            timeout_ms: 50,
            address: Some(silent.local_addr().unwrap().to_string()),
        };
        let mut monitor = QueryMonitor::new(&harness.ctx, config);
        monitor.on_server_start().await.unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(10), harness.ctx.control.terminated())
            .await
            .unwrap();
        assert_eq!(reason, UDP_SHUTDOWN_REASON);
        assert!(harness.event_names().contains(&names::UDP_CRASH.to_string()));
    }

    #[tokio::test]
    async fn test_disabled_query_server_skips_check() {
        let harness = Harness::new();
        harness
            .ctx
            .settings
            .update(|s| s.run_query_server = false)
            .await;
        let mut monitor = QueryMonitor::new(&harness.ctx, QueryConfig::default());
        monitor.on_server_start().await.unwrap();
        assert!(monitor.task.is_none());
    }
}
