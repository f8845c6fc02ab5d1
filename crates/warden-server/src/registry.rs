//! Player registry and login correlation
//!
//! [`PlayerTable`] is the plain data structure. [`ConnectionRegistry`] wraps
//! it in a lock and publishes a [`ConnectionEvent`] for every change while
//! still holding the lock, so subscribers see changes in the order they
//! were applied.
//!
//! Every connect and removal bumps the table's generation. A listing is
//! applied against the generation read before it was requested, so players
//! that joined or left while the listing was in flight are left alone.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};
use warden_core::{ConnectionId, ListedPlayer, PendingLogin, Player};

/// Disconnect reason used when the log line gives none
pub const UNKNOWN_DISCONNECT_REASON: &str = "Disconnected for unknown reasons";

/// Disconnect reason used when a listing no longer shows a player
pub const NOT_LISTED_REASON: &str = "Not listed by server";

const EVENT_CAPACITY: usize = 256;

/// Change to the set of connected players
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected(Player),
    Disconnected { player: Player, reason: String },
    Updated(Player),
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("No pending login for '{character}' from {address}")]
    NoPendingLogin { character: String, address: String },
    #[error("Connection not found: {0}")]
    NotFound(ConnectionId),
}

struct PendingEntry {
    login: PendingLogin,
    seen_at: Instant,
}

/// Players by connection id plus logins waiting for their connect line
pub struct PlayerTable {
    players: HashMap<ConnectionId, Player>,
    pending: VecDeque<PendingEntry>,
    last_connected: Option<ConnectionId>,
    generation: u64,
    /// Generation at which each current player joined
    joined: HashMap<ConnectionId, u64>,
    /// Generation at which a connection id was last removed
    departed: HashMap<ConnectionId, u64>,
    pending_ttl: Duration,
    max_pending: usize,
}

/// Result of applying a listing
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Reconciliation {
    /// Players only the listing knew about
    pub added: Vec<Player>,
    /// Players the listing no longer shows
    pub removed: Vec<Player>,
    /// Players whose UUID changed
    pub updated: Vec<Player>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

impl PlayerTable {
    /// Create a table whose pending logins live at most `pending_ttl`
    pub fn new(pending_ttl: Duration, max_pending: usize) -> Self {
        Self {
            players: HashMap::new(),
            pending: VecDeque::new(),
            last_connected: None,
            generation: 0,
            joined: HashMap::new(),
            departed: HashMap::new(),
            pending_ttl,
            max_pending: max_pending.max(1),
        }
    }

    /// Remember a login until its connect line arrives
    pub fn record_login(&mut self, login: PendingLogin, now: Instant) {
        self.evict_expired(now);
        while self.pending.len() >= self.max_pending {
            if let Some(dropped) = self.pending.pop_front() {
                warn!(
                    "Pending login queue full, dropping '{}' from {}",
                    dropped.login.character, dropped.login.address
                );
            }
        }
        self.pending.push_back(PendingEntry { login, seen_at: now });
    }

    /// Drop logins older than the TTL
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let ttl = self.pending_ttl;
        let before = self.pending.len();
        self.pending
            .retain(|entry| now.saturating_duration_since(entry.seen_at) <= ttl);
        let evicted = before - self.pending.len();
        if evicted > 0 {
            debug!("Evicted {} stale pending logins", evicted);
        }
        evicted
    }

    /// Turn the matching pending login into a player.
    ///
    /// Returns the new player and any stale player that held the id.
    pub fn promote(
        &mut self,
        connection_id: ConnectionId,
        character: &str,
        address: &str,
        now: Instant,
    ) -> Result<(Player, Option<Player>), RegistryError> {
        self.evict_expired(now);
        let index = self
            .pending
            .iter()
            .position(|entry| entry.login.matches(character, address))
            .ok_or_else(|| RegistryError::NoPendingLogin {
                character: character.to_string(),
                address: address.to_string(),
            })?;

        let entry = self.pending.remove(index).ok_or(RegistryError::NotFound(connection_id))?;
        let player = Player::from_login(connection_id, entry.login);
        let replaced = self.insert(player.clone());
        Ok((player, replaced))
    }

    fn insert(&mut self, player: Player) -> Option<Player> {
        self.generation += 1;
        let id = player.connection_id;
        self.joined.insert(id, self.generation);
        self.departed.remove(&id);
        self.last_connected = Some(id);
        self.players.insert(id, player)
    }

    /// Remove a player
    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<Player> {
        let player = self.players.remove(&connection_id)?;
        self.generation += 1;
        self.joined.remove(&connection_id);
        self.departed.insert(connection_id, self.generation);
        Some(player)
    }

    /// Current generation, to be read before requesting a listing
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Get a player
    pub fn get(&self, connection_id: ConnectionId) -> Option<&Player> {
        self.players.get(&connection_id)
    }

    /// Get a mutable player
    pub fn get_mut(&mut self, connection_id: ConnectionId) -> Option<&mut Player> {
        self.players.get_mut(&connection_id)
    }

    /// Find a player by character name
    pub fn find_by_username(&self, username: &str) -> Option<&Player> {
        self.players.values().find(|p| p.username == username)
    }

    /// Make the table match a listing requested at generation `since`.
    ///
    /// Players that joined after `since` are kept even when unlisted, and
    /// ids removed after `since` are not brought back by the listing.
    pub fn reconcile(&mut self, listing: &[ListedPlayer], since: u64) -> Reconciliation {
        let mut result = Reconciliation::default();
        let listed: HashMap<ConnectionId, &ListedPlayer> =
            listing.iter().map(|l| (l.connection_id, l)).collect();

        let mut gone: Vec<ConnectionId> = Vec::new();
        for (id, player) in self.players.iter_mut() {
            match listed.get(id) {
                Some(entry) => {
                    if player.uuid.as_deref() != Some(entry.uuid.as_str()) {
                        player.uuid = Some(entry.uuid.clone());
                        result.updated.push(player.clone());
                    }
                }
                None if self.joined.get(id).is_some_and(|joined| *joined > since) => {
                    debug!("Connection {} joined after the listing was requested", id);
                }
                None => gone.push(*id),
            }
        }
        gone.sort_unstable();
        for id in gone {
            if let Some(player) = self.remove(id) {
                result.removed.push(player);
            }
        }

        let mut seen = HashSet::new();
        for entry in listing {
            let id = entry.connection_id;
            if !seen.insert(id) || self.players.contains_key(&id) {
                continue;
            }
            if self.departed.get(&id).is_some_and(|left| *left > since) {
                debug!("Connection {} left after the listing was requested", id);
                continue;
            }
            let player = Player::from_listing(entry);
            self.insert(player.clone());
            result.added.push(player);
        }

        self.departed.retain(|_, left| *left > since);
        result
    }

    /// List all players ordered by connection id
    pub fn list(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self.players.values().cloned().collect();
        players.sort_by_key(|p| p.connection_id);
        players
    }

    /// Number of connected players
    pub fn count(&self) -> usize {
        self.players.len()
    }

    /// Number of logins waiting for their connect line
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn last_connected_id(&self) -> Option<ConnectionId> {
        self.last_connected
    }

    /// Most recently connected player still present
    pub fn latest_player(&self) -> Option<&Player> {
        self.last_connected.and_then(|id| self.players.get(&id))
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.players.clear();
        self.pending.clear();
        self.joined.clear();
        self.departed.clear();
        self.last_connected = None;
        self.generation += 1;
    }
}

/// Shared player registry
pub struct ConnectionRegistry {
    table: RwLock<PlayerTable>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionRegistry {
    pub fn new(pending_ttl: Duration, max_pending: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            table: RwLock::new(PlayerTable::new(pending_ttl, max_pending)),
            events,
        }
    }

    /// Subscribe to connection events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub async fn record_login(&self, login: PendingLogin) {
        debug!(
            "Pending login '{}' from {} (account {:?})",
            login.character, login.address, login.account
        );
        self.table.write().await.record_login(login, Instant::now());
    }

    /// Promote a pending login. `None` if no login matched.
    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        character: &str,
        address: &str,
    ) -> Option<Player> {
        let mut table = self.table.write().await;
        match table.promote(connection_id, character, address, Instant::now()) {
            Ok((player, replaced)) => {
                if let Some(stale) = replaced {
                    warn!("Connection {} reused before its disconnect was seen", connection_id);
                    self.emit(ConnectionEvent::Disconnected {
                        player: stale,
                        reason: UNKNOWN_DISCONNECT_REASON.to_string(),
                    });
                }
                self.emit(ConnectionEvent::Connected(player.clone()));
                Some(player)
            }
            Err(e) => {
                warn!("Connect for {} ignored: {}", connection_id, e);
                None
            }
        }
    }

    /// Remove a player. `None` if the id was unknown.
    pub async fn disconnect(&self, connection_id: ConnectionId, reason: Option<&str>) -> Option<Player> {
        let mut table = self.table.write().await;
        let player = table.remove(connection_id)?;
        self.emit(ConnectionEvent::Disconnected {
            player: player.clone(),
            reason: reason.unwrap_or(UNKNOWN_DISCONNECT_REASON).to_string(),
        });
        Some(player)
    }

    /// Mutate a player in place
    pub async fn update<F>(&self, connection_id: ConnectionId, f: F) -> Option<Player>
    where
        F: FnOnce(&mut Player),
    {
        let mut table = self.table.write().await;
        let player = table.get_mut(connection_id)?;
        f(player);
        let player = player.clone();
        self.emit(ConnectionEvent::Updated(player.clone()));
        Some(player)
    }

    /// Set the nickname of the player with the given character name
    pub async fn set_nickname(&self, username: &str, nickname: &str) -> Option<Player> {
        let mut table = self.table.write().await;
        let id = table.find_by_username(username)?.connection_id;
        let player = table.get_mut(id)?;
        player.nickname = Some(nickname.to_string());
        let player = player.clone();
        self.emit(ConnectionEvent::Updated(player.clone()));
        Some(player)
    }

    /// Generation to pair with a listing about to be requested
    pub async fn generation(&self) -> u64 {
        self.table.read().await.generation()
    }

    /// Make the registry match an authoritative listing requested at `since`
    pub async fn reconcile(&self, listing: &[ListedPlayer], since: u64) -> Reconciliation {
        let mut table = self.table.write().await;
        let result = table.reconcile(listing, since);
        for player in &result.removed {
            self.emit(ConnectionEvent::Disconnected {
                player: player.clone(),
                reason: NOT_LISTED_REASON.to_string(),
            });
        }
        for player in &result.updated {
            self.emit(ConnectionEvent::Updated(player.clone()));
        }
        for player in &result.added {
            self.emit(ConnectionEvent::Connected(player.clone()));
        }
        result
    }

    pub async fn get(&self, connection_id: ConnectionId) -> Option<Player> {
        self.table.read().await.get(connection_id).cloned()
    }

    /// Snapshot of every connected player
    pub async fn players(&self) -> Vec<Player> {
        self.table.read().await.list()
    }

    pub async fn count(&self) -> usize {
        self.table.read().await.count()
    }

    pub async fn pending_count(&self) -> usize {
        self.table.read().await.pending_count()
    }

    pub async fn last_connected_id(&self) -> Option<ConnectionId> {
        self.table.read().await.last_connected_id()
    }

    pub async fn latest_player(&self) -> Option<Player> {
        self.table.read().await.latest_player().cloned()
    }

    /// Whether this exact player is still connected
    pub async fn is_connected(&self, player: &Player) -> bool {
        self.table
            .read()
            .await
            .get(player.connection_id)
            .is_some_and(|current| current.same_connection(player))
    }

    /// Connected players other than `player` (by connection id)
    pub async fn others(&self, player: &Player) -> Vec<Player> {
        self.table
            .read()
            .await
            .list()
            .into_iter()
            .filter(|p| p.connection_id != player.connection_id)
            .collect()
    }

    /// Drop all state without publishing events
    pub async fn clear(&self) {
        self.table.write().await.clear();
    }
}
