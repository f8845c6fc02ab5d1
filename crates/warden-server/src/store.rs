//! In-process persistence

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::debug;
use warden_core::{Ban, ConnectionId, Player, Result, Session, TicketSequence, Uptime};

use crate::collaborators::Store;

#[derive(Default)]
struct Tables {
    tickets: TicketSequence,
    bans: Vec<Ban>,
    sessions: Vec<Session>,
    uptimes: Vec<Uptime>,
    next_session: u64,
    next_uptime: u64,
}

/// Store that keeps everything in memory for the lifetime of the process
pub struct MemoryStore {
    tables: Mutex<Tables>,
    admins: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_tickets(TicketSequence::default())
    }

    /// Use a custom ticket sequence
    pub fn with_tickets(tickets: TicketSequence) -> Self {
        Self {
            tables: Mutex::new(Tables {
                tickets,
                ..Default::default()
            }),
            admins: HashSet::new(),
        }
    }

    /// Accounts with administrator rights (compared case-insensitively)
    pub fn with_admins<I, S>(mut self, admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.admins = admins
            .into_iter()
            .map(|a| a.as_ref().to_lowercase())
            .collect();
        self
    }

    pub async fn sessions(&self) -> Vec<Session> {
        self.tables.lock().await.sessions.clone()
    }

    pub async fn uptimes(&self) -> Vec<Uptime> {
        self.tables.lock().await.uptimes.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_ban(&self, mut ban: Ban) -> Result<Ban> {
        let mut tables = self.tables.lock().await;
        match ban.ticket {
            Some(ticket) => {
                tables.tickets.observe(ticket);
                if let Some(existing) = tables.bans.iter_mut().find(|b| b.ticket == Some(ticket)) {
                    *existing = ban.clone();
                    return Ok(ban);
                }
            }
            None => ban.ticket = Some(tables.tickets.next_ticket()),
        }
        debug!("Stored {}", ban);
        tables.bans.push(ban.clone());
        Ok(ban)
    }

    async fn bans(&self) -> Result<Vec<Ban>> {
        Ok(self.tables.lock().await.bans.clone())
    }

    async fn open_session(&self, player: &Player) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        tables.next_session += 1;
        let id = tables.next_session;
        tables.sessions.push(Session::open(id, player));
        Ok(id)
    }

    async fn close_session(&self, connection: ConnectionId) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        for session in tables
            .sessions
            .iter_mut()
            .filter(|s| s.connection_id == connection && s.is_open())
        {
            session.disconnected_at = Some(now);
        }
        Ok(())
    }

    async fn close_open_sessions(&self) -> Result<usize> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let mut closed = 0;
        for session in tables.sessions.iter_mut().filter(|s| s.is_open()) {
            session.disconnected_at = Some(now);
            closed += 1;
        }
        Ok(closed)
    }

    async fn start_uptime(&self) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        tables.next_uptime += 1;
        let id = tables.next_uptime;
        tables.uptimes.push(Uptime::start(id));
        Ok(id)
    }

    async fn end_uptime(&self, id: u64, reason: &str, last_log: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(uptime) = tables.uptimes.iter_mut().find(|u| u.id == id) {
            uptime.ended = Some(Utc::now());
            uptime.reason = reason.to_string();
            uptime.last_log = last_log.to_string();
        }
        Ok(())
    }

    async fn close_open_uptimes(&self, reason: &str) -> Result<usize> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let mut closed = 0;
        for uptime in tables.uptimes.iter_mut().filter(|u| u.is_open()) {
            uptime.ended = Some(now);
            uptime.reason = reason.to_string();
            closed += 1;
        }
        Ok(closed)
    }

    async fn is_admin(&self, account: &str) -> Result<bool> {
        Ok(self.admins.contains(&account.to_lowercase()))
    }
}
