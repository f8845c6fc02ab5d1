//! Bans and ban tickets

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use crate::error::{Result, WardenError};
use crate::player::Player;

/// What a ban applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BanType {
    Ip,
    Uuid,
    Both,
}

impl BanType {
    /// Mode argument understood by the server's `ban` command
    pub fn as_command_arg(self) -> &'static str {
        match self {
            BanType::Ip => "ip",
            BanType::Uuid => "uuid",
            BanType::Both => "both",
        }
    }
}

/// A ban record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ban {
    /// Assigned when the ban is first saved
    pub ticket: Option<u64>,
    pub ip: Option<String>,
    pub uuid: Option<String>,
    /// Reason shown to the player. May contain `{ticket}`, `{moderator}`,
    /// `{expire}` and `{expire_time}` until the ban is added.
    pub reason: String,
    pub moderator: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Ban {
    pub fn new(
        ip: Option<String>,
        uuid: Option<String>,
        reason: impl Into<String>,
        moderator: impl Into<String>,
    ) -> Self {
        Self {
            ticket: None,
            ip,
            uuid,
            reason: reason.into(),
            moderator: moderator.into(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Ban a player's address and character
    pub fn for_player(player: &Player, reason: impl Into<String>, moderator: impl Into<String>) -> Self {
        Self::new(player.ip.clone(), player.uuid.clone(), reason, moderator)
    }

    /// Expire the ban after `duration`
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.expires_at = Some(self.created_at + duration);
        self
    }

    /// Derived ban type, `None` if the ban targets nothing
    pub fn ban_type(&self) -> Option<BanType> {
        let has_ip = self.ip.as_deref().is_some_and(|ip| !ip.is_empty());
        let has_uuid = self.uuid.as_deref().is_some_and(|uuid| !uuid.is_empty());
        match (has_ip, has_uuid) {
            (true, true) => Some(BanType::Both),
            (true, false) => Some(BanType::Ip),
            (false, true) => Some(BanType::Uuid),
            (false, false) => None,
        }
    }

    /// Check the ban can be persisted
    pub fn validate(&self) -> Result<BanType> {
        let ban_type = self
            .ban_type()
            .ok_or_else(|| WardenError::InvalidBan("ban has neither an IP nor a UUID".to_string()))?;

        if let Some(ip) = self.ip.as_deref().filter(|ip| !ip.is_empty()) {
            if parse_address(ip).is_none() {
                return Err(WardenError::InvalidBan(format!("cannot parse IP address '{}'", ip)));
            }
        }

        Ok(ban_type)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    /// Reason with every placeholder resolved
    pub fn formatted_reason(&self) -> String {
        self.formatted_reason_at(Utc::now())
    }

    pub fn formatted_reason_at(&self, now: DateTime<Utc>) -> String {
        let mut reason = self.reason.clone();
        if !reason.contains("{ticket}") {
            reason.push_str("\n^orange;Ban Ticket: ^white;{ticket}");
        }

        let ticket = self
            .ticket
            .map(|ticket| ticket.to_string())
            .unwrap_or_else(|| "pending".to_string());
        reason = reason
            .replace("{ticket}", &ticket)
            .replace("{moderator}", &self.moderator);

        match self.expires_at {
            Some(expiry) => {
                if !reason.contains("{expire}") && !reason.contains("{expire_time}") {
                    reason.push_str("\n^orange;Expires ^white;{expire}");
                }
                reason
                    .replace("{expire}", &expiry.format("%d %b %Y %H:%M UTC").to_string())
                    .replace("{expire_time}", &format_remaining(expiry - now))
            }
            None => reason
                .replace("{expire}", "never")
                .replace("{expire_time}", "never"),
        }
    }
}

impl fmt::Display for Ban {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ticket = self.ticket.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string());
        let kind = self
            .ban_type()
            .map(BanType::as_command_arg)
            .unwrap_or("invalid");
        write!(
            f,
            "Ban ({}) [{}] {} {}",
            ticket,
            kind,
            self.ip.as_deref().unwrap_or(""),
            self.uuid.as_deref().unwrap_or("")
        )
    }
}

/// Parse an address with or without a port
pub fn parse_address(address: &str) -> Option<IpAddr> {
    address
        .parse::<IpAddr>()
        .ok()
        .or_else(|| address.parse::<std::net::SocketAddr>().ok().map(|s| s.ip()))
}

fn format_remaining(remaining: Duration) -> String {
    if remaining <= Duration::zero() {
        return "now".to_string();
    }
    let days = remaining.num_days();
    let hours = remaining.num_hours() % 24;
    let minutes = remaining.num_minutes() % 60;
    match (days, hours) {
        (0, 0) => format!("{}m", minutes.max(1)),
        (0, _) => format!("{}h {}m", hours, minutes),
        _ => format!("{}d {}h", days, hours),
    }
}

/// Ticket generator that advances by a fixed step
#[derive(Debug, Clone)]
pub struct TicketSequence {
    next: u64,
    step: u64,
}

impl TicketSequence {
    pub fn new(start: u64, step: u64) -> Self {
        Self {
            next: start,
            step: step.max(1),
        }
    }

    /// Take the next ticket
    pub fn next_ticket(&mut self) -> u64 {
        let ticket = self.next;
        self.next = self.next.saturating_add(self.step);
        ticket
    }

    /// Make sure future tickets stay above an already issued one
    pub fn observe(&mut self, issued: u64) {
        if issued >= self.next {
            self.next = issued.saturating_add(self.step);
        }
    }
}

impl Default for TicketSequence {
    fn default() -> Self {
        Self::new(1000, 7)
    }
}
