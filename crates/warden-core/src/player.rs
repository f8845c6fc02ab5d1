//! Player, login correlation and listing types

use serde::{Deserialize, Serialize};

/// Connection identifier assigned by the game server
pub type ConnectionId = u32;

/// Account name the server reports for logins without an account
pub const ANONYMOUS_ACCOUNT: &str = "<anonymous>";

/// A connected player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub connection_id: ConnectionId,
    /// Character name
    pub username: String,
    /// Nickname set with `/nick`
    pub nickname: Option<String>,
    /// Server account, `None` for anonymous connections
    pub account: Option<String>,
    /// Character UUID, known after the first listing
    pub uuid: Option<String>,
    pub ip: Option<String>,
    pub is_admin: bool,
    pub is_vpn: bool,
    /// Last world the player warped to
    pub location: Option<String>,
}

impl Player {
    /// Create a player with only an id and a name
    pub fn new(connection_id: ConnectionId, username: impl Into<String>) -> Self {
        Self {
            connection_id,
            username: username.into(),
            nickname: None,
            account: None,
            uuid: None,
            ip: None,
            is_admin: false,
            is_vpn: false,
            location: None,
        }
    }

    /// Promote a pending login once the server assigned a connection id
    pub fn from_login(connection_id: ConnectionId, login: PendingLogin) -> Self {
        Self {
            account: login.account,
            ip: Some(login.address),
            ..Self::new(connection_id, login.character)
        }
    }

    /// Create a player discovered through a server listing
    pub fn from_listing(listed: &ListedPlayer) -> Self {
        Self {
            uuid: Some(listed.uuid.clone()),
            ..Self::new(listed.connection_id, listed.name.clone())
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.account.is_none()
    }

    /// Nickname if set, otherwise the character name
    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.username)
    }

    /// Whether `other` describes the same live connection as `self`
    pub fn same_connection(&self, other: &Player) -> bool {
        if self.connection_id != other.connection_id {
            return false;
        }
        match (&self.uuid, &other.uuid) {
            (Some(a), Some(b)) => a == b,
            _ => self.account == other.account && self.username == other.username,
        }
    }
}

/// Normalize the account field of a login line
pub fn account_from_log(raw: &str) -> Option<String> {
    if raw == ANONYMOUS_ACCOUNT {
        return None;
    }
    let trimmed = raw.trim_matches('\'');
    if trimmed.is_empty() || trimmed == ANONYMOUS_ACCOUNT {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// A login seen in the log, waiting for its connect line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLogin {
    pub account: Option<String>,
    pub character: String,
    pub address: String,
}

impl PendingLogin {
    pub fn matches(&self, character: &str, address: &str) -> bool {
        self.character == character && self.address == address
    }
}

/// One row of the server's authoritative player listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedPlayer {
    pub connection_id: ConnectionId,
    pub name: String,
    pub uuid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_from_log() {
        assert_eq!(account_from_log("<anonymous>"), None);
        assert_eq!(account_from_log("'<anonymous>'"), None);
        assert_eq!(account_from_log("'admin'"), Some("admin".to_string()));
        assert_eq!(account_from_log("bob"), Some("bob".to_string()));
    }

    #[test]
    fn test_from_login() {
        let login = PendingLogin {
            account: Some("acct".to_string()),
            character: "Bob".to_string(),
            address: "10.0.0.1".to_string(),
        };
        let player = Player::from_login(4, login);
        assert_eq!(player.connection_id, 4);
        assert_eq!(player.username, "Bob");
        assert_eq!(player.ip.as_deref(), Some("10.0.0.1"));
        assert!(!player.is_anonymous());
        assert_eq!(player.display_name(), "Bob");
    }

    #[test]
    fn test_same_connection() {
        let mut a = Player::new(1, "Bob");
        let mut b = Player::new(1, "Bob");
        assert!(a.same_connection(&b));

        a.uuid = Some("aaaa".to_string());
        b.uuid = Some("bbbb".to_string());
        assert!(!a.same_connection(&b));

        let c = Player::new(2, "Bob");
        assert!(!Player::new(1, "Bob").same_connection(&c));
    }
}
