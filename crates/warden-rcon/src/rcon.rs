//! Source RCON protocol client
//!
//! Implements the Valve Source RCON protocol spoken by the Starbound server.
//! Protocol reference: https://developer.valvesoftware.com/wiki/Source_RCON_Protocol

use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use warden_core::WardenError;

/// RCON packet type constants
pub mod packet_type {
    /// Command output, and the empty packet preceding an auth response
    pub const RESPONSE_VALUE: i32 = 0;
    /// Authentication response / Execute command (context-dependent)
    pub const EXEC_COMMAND: i32 = 2;
    pub const AUTH_RESPONSE: i32 = 2;
    /// Authenticate with password
    pub const AUTH: i32 = 3;
}

/// Upper bound on an incoming packet's declared size
const MAX_PACKET_SIZE: usize = 64 * 1024;

/// RCON packet types for creating packets
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PacketType {
    ExecCommand,
    Auth,
}

impl PacketType {
    /// Get the wire protocol value
    pub fn as_i32(self) -> i32 {
        match self {
            PacketType::ExecCommand => packet_type::EXEC_COMMAND,
            PacketType::Auth => packet_type::AUTH,
        }
    }
}

#[derive(Debug, Error)]
pub enum RconError {
    #[error("RCON connect to {address} failed: {source}")]
    Connect { address: String, source: io::Error },

    #[error("RCON not connected")]
    NotConnected,

    #[error("RCON authentication failed")]
    AuthFailed,

    #[error("RCON I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("RCON timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed RCON packet: {0}")]
    Malformed(String),
}

impl RconError {
    /// Whether retrying on a fresh connection could help
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            RconError::NotConnected | RconError::Io(_) | RconError::Timeout(_)
        )
    }
}

impl From<RconError> for WardenError {
    fn from(err: RconError) -> Self {
        match err {
            RconError::Malformed(_) => WardenError::Protocol(err.to_string()),
            _ => WardenError::Command(err.to_string()),
        }
    }
}

pub type RconResult<T> = std::result::Result<T, RconError>;

/// A single RCON packet
#[derive(Debug, Clone, PartialEq)]
pub struct RconPacket {
    pub id: i32,
    pub packet_type: i32,
    pub body: String,
}

impl RconPacket {
    pub fn new(id: i32, packet_type: PacketType, body: impl Into<String>) -> Self {
        Self {
            id,
            packet_type: packet_type.as_i32(),
            body: body.into(),
        }
    }

    /// Serialize packet to bytes, size prefix included
    pub fn to_bytes(&self) -> Vec<u8> {
        let body_bytes = self.body.as_bytes();
        // Size = id(4) + type(4) + body + null(1) + null(1)
        let size = 4 + 4 + body_bytes.len() + 2;

        let mut buf = Vec::with_capacity(4 + size);
        buf.extend_from_slice(&(size as i32).to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.packet_type.to_le_bytes());
        buf.extend_from_slice(body_bytes);
        buf.push(0);
        buf.push(0);

        buf
    }

    /// Parse packet from bytes (excluding size prefix)
    pub fn from_bytes(data: &[u8]) -> RconResult<Self> {
        if data.len() < 10 {
            return Err(RconError::Malformed(format!(
                "{} bytes is shorter than the 10 byte minimum",
                data.len()
            )));
        }

        let id = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let packet_type = i32::from_le_bytes([data[4], data[5], data[6], data[7]]);

        // Body is everything after type until the first null
        let body_end = data[8..]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(data.len() - 8);
        let body = String::from_utf8_lossy(&data[8..8 + body_end]).to_string();

        Ok(Self {
            id,
            packet_type,
            body,
        })
    }
}

async fn write_packet(stream: &mut TcpStream, packet: &RconPacket) -> RconResult<()> {
    stream.write_all(&packet.to_bytes()).await?;
    Ok(())
}

async fn read_packet(stream: &mut TcpStream) -> RconResult<RconPacket> {
    let mut size_buf = [0u8; 4];
    stream.read_exact(&mut size_buf).await?;
    let size = i32::from_le_bytes(size_buf);

    if size < 10 || size as usize > MAX_PACKET_SIZE {
        return Err(RconError::Malformed(format!("declared size {}", size)));
    }

    let mut data = vec![0u8; size as usize];
    stream.read_exact(&mut data).await?;
    RconPacket::from_bytes(&data)
}

/// RCON client holding one authenticated connection, reconnecting on loss
pub struct RconClient {
    stream: Mutex<Option<TcpStream>>,
    address: String,
    password: String,
    timeout: Duration,
    next_id: AtomicI32,
    authenticated: AtomicBool,
}

impl RconClient {
    pub fn new(address: impl Into<String>, password: impl Into<String>, timeout: Duration) -> Self {
        Self {
            stream: Mutex::new(None),
            address: address.into(),
            password: password.into(),
            timeout,
            next_id: AtomicI32::new(10),
            authenticated: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Check if connected and authenticated
    pub fn is_connected(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Connect and authenticate with the RCON server
    pub async fn connect(&self) -> RconResult<()> {
        let mut guard = self.stream.lock().await;
        self.connect_locked(&mut guard).await
    }

    async fn connect_locked(&self, slot: &mut Option<TcpStream>) -> RconResult<()> {
        *slot = None;
        self.authenticated.store(false, Ordering::SeqCst);
        info!("Connecting to RCON at {}", self.address);

        let mut stream = self
            .with_timeout(TcpStream::connect(&self.address))
            .await?
            .map_err(|source| RconError::Connect {
                address: self.address.clone(),
                source,
            })?;

        let auth_id = self.next_id();
        write_packet(&mut stream, &RconPacket::new(auth_id, PacketType::Auth, &self.password))
            .await?;

        // An empty RESPONSE_VALUE may precede the auth response
        let response = loop {
            let packet = self.with_timeout(read_packet(&mut stream)).await??;
            if packet.packet_type == packet_type::AUTH_RESPONSE {
                break packet;
            }
            debug!("Skipping RCON packet of type {} during auth", packet.packet_type);
        };

        if response.id == -1 {
            return Err(RconError::AuthFailed);
        }
        if response.id != auth_id {
            warn!(
                "RCON auth response ID mismatch: expected {}, got {}",
                auth_id, response.id
            );
        }

        *slot = Some(stream);
        self.authenticated.store(true, Ordering::SeqCst);
        info!("RCON authenticated");
        Ok(())
    }

    async fn with_timeout<F: std::future::Future>(&self, future: F) -> RconResult<F::Output> {
        tokio::time::timeout(self.timeout, future)
            .await
            .map_err(|_| RconError::Timeout(self.timeout))
    }

    /// Execute a command and return the response body, reconnecting once on a lost connection
    pub async fn execute(&self, command: &str) -> RconResult<String> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            self.connect_locked(&mut guard).await?;
        }

        match self.exchange(&mut guard, command).await {
            Ok(body) => Ok(body),
            Err(e) if e.is_connection_lost() => {
                warn!("RCON connection lost ({}), reconnecting", e);
                self.connect_locked(&mut guard).await?;
                self.exchange(&mut guard, command).await
            }
            Err(e) => Err(e),
        }
    }

    async fn exchange(&self, slot: &mut Option<TcpStream>, command: &str) -> RconResult<String> {
        let stream = slot.as_mut().ok_or(RconError::NotConnected)?;
        let id = self.next_id();
        debug!("RCON exec: {}", command);

        let result = self
            .with_timeout(async {
                write_packet(stream, &RconPacket::new(id, PacketType::ExecCommand, command)).await?;
                read_packet(stream).await
            })
            .await
            .and_then(|r| r);

        let packet = match result {
            Ok(packet) => packet,
            Err(e) => {
                // The stream position is unknown after a failed exchange
                *slot = None;
                self.authenticated.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        if packet.id != id {
            debug!("Response ID mismatch: expected {}, got {}", id, packet.id);
        }
        Ok(packet.body)
    }

    /// Disconnect from the server
    pub async fn disconnect(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
        }
        self.authenticated.store(false, Ordering::SeqCst);
        info!("RCON disconnected");
    }
}
