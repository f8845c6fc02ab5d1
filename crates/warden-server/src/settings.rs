//! Game configuration management
//!
//! The game server only reads its configuration file on start or on
//! `serverreload`. [`SettingsManager`] keeps the current settings in memory,
//! merges active bans into them on save, and serializes save + reload so
//! callers never observe one without the other.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use warden_core::{Result, ServerSettings, WardenError};

use crate::collaborators::{CommandClient, SettingsStore, Store};

/// Settings stored as the game's JSON configuration file
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn load(&self) -> Result<ServerSettings> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                WardenError::Settings(format!("Failed to parse {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "No configuration at {}, starting from defaults",
                    self.path.display()
                );
                Ok(ServerSettings::default())
            }
            Err(e) => Err(WardenError::Settings(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn save(&self, settings: &ServerSettings) -> Result<()> {
        let json = serde_json::to_string_pretty(settings)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write then rename so the server never reads a half-written file
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await.map_err(|e| {
            WardenError::Settings(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            WardenError::Settings(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;
        debug!("Saved configuration to {}", self.path.display());
        Ok(())
    }
}

/// Settings kept in memory only
#[derive(Default)]
pub struct MemorySettingsStore {
    settings: RwLock<ServerSettings>,
}

impl MemorySettingsStore {
    pub fn new(settings: ServerSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<ServerSettings> {
        Ok(self.settings.read().await.clone())
    }

    async fn save(&self, settings: &ServerSettings) -> Result<()> {
        *self.settings.write().await = settings.clone();
        Ok(())
    }
}

/// Current settings plus the save/reload path
pub struct SettingsManager {
    current: RwLock<ServerSettings>,
    store: Arc<dyn SettingsStore>,
    bans: Arc<dyn Store>,
    commands: Arc<dyn CommandClient>,
    save_lock: Mutex<()>,
}

impl SettingsManager {
    pub fn new(
        store: Arc<dyn SettingsStore>,
        bans: Arc<dyn Store>,
        commands: Arc<dyn CommandClient>,
    ) -> Self {
        Self {
            current: RwLock::new(ServerSettings::default()),
            store,
            bans,
            commands,
            save_lock: Mutex::new(()),
        }
    }

    /// Reload from the store
    pub async fn load(&self) -> Result<ServerSettings> {
        let settings = self.store.load().await?;
        *self.current.write().await = settings.clone();
        Ok(settings)
    }

    /// Snapshot of the current settings
    pub async fn current(&self) -> ServerSettings {
        self.current.read().await.clone()
    }

    /// Change the in-memory settings. Call [`save`](Self::save) to persist.
    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut ServerSettings),
    {
        f(&mut *self.current.write().await);
    }

    /// Persist the settings with active bans merged in, then optionally
    /// ask the running server to reload them.
    pub async fn save(&self, reload: bool) -> Result<()> {
        let _guard = self.save_lock.lock().await;

        let bans = self.bans.bans().await?;
        let settings = {
            let mut current = self.current.write().await;
            current.apply_bans(&bans);
            current.clone()
        };
        self.store.save(&settings).await?;

        if reload {
            let response = self.commands.reload_server().await?;
            if !response.success {
                warn!("Server refused to reload: {}", response.message);
                return Err(WardenError::Command(format!(
                    "Reload failed: {}",
                    response.message
                )));
            }
            info!("Server configuration reloaded");
        }
        Ok(())
    }
}
