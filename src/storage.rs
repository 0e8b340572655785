use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, warn};

/// Datos del canal de peticiones de una guild, tal como se guardan en JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildSetup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dj_role: Option<u64>,
    #[serde(default)]
    pub stay_247: bool,
}

impl GuildSetup {
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel.map(ChannelId::new)
    }

    pub fn message_id(&self) -> Option<MessageId> {
        self.message.map(MessageId::new)
    }

    pub fn dj_role_id(&self) -> Option<RoleId> {
        self.dj_role.map(RoleId::new)
    }
}

/// Persistent map of guild id -> [`GuildSetup`], backed by a single JSON file.
///
/// Reads are served from memory. Every mutation rewrites the whole file
/// through a temporary file and a rename, so a crash never leaves a
/// half-written document behind.
pub struct SetupStore {
    path: PathBuf,
    guilds: RwLock<HashMap<u64, GuildSetup>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl SetupStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let guilds = load_file(&path).await;
        info!("📁 {} canales de peticiones cargados desde {}", guilds.len(), path.display());

        Ok(Self {
            path,
            guilds: RwLock::new(guilds),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn get(&self, guild_id: GuildId) -> Option<GuildSetup> {
        self.guilds.read().get(&guild_id.get()).cloned()
    }

    /// Ids of every guild with stored data.
    pub fn guilds(&self) -> Vec<GuildId> {
        self.guilds.read().keys().copied().map(GuildId::new).collect()
    }

    pub fn len(&self) -> usize {
        self.guilds.read().len()
    }

    /// Mutates (creating if needed) the entry of a guild and persists the map.
    pub async fn update<F, R>(&self, guild_id: GuildId, f: F) -> R
    where
        F: FnOnce(&mut GuildSetup) -> R,
    {
        let result = {
            let mut guilds = self.guilds.write();
            f(guilds.entry(guild_id.get()).or_default())
        };
        self.persist().await;
        result
    }

    pub async fn remove(&self, guild_id: GuildId) -> Option<GuildSetup> {
        let removed = self.guilds.write().remove(&guild_id.get());
        if removed.is_some() {
            self.persist().await;
            debug!("🗑️ Datos de setup eliminados para guild {}", guild_id);
        }
        removed
    }

    async fn persist(&self) {
        let _guard = self.write_lock.lock().await;

        let content = {
            let guilds = self.guilds.read();
            serde_json::to_string_pretty(&*guilds)
        };

        let result = match content {
            Ok(content) => write_atomic(&self.path, content.as_bytes()).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            error!("Error guardando {}: {:?}", self.path.display(), e);
        }
    }
}

async fn load_file(path: &Path) -> HashMap<u64, GuildSetup> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            error!("Error leyendo {}: {}", path.display(), e);
            return HashMap::new();
        }
    };

    match serde_json::from_str(&content) {
        Ok(guilds) => guilds,
        Err(e) => {
            warn!("Archivo {} corrupto, se ignora: {}", path.display(), e);
            HashMap::new()
        }
    }
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = SetupStore::open(dir.path().join("setup_channels.json")).await.unwrap();
        assert_eq!(store.len(), 0);
        assert!(store.get(GuildId::new(1)).is_none());
    }

    #[tokio::test]
    async fn test_update_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("setup_channels.json");
        let guild = GuildId::new(42);

        let store = SetupStore::open(&path).await.unwrap();
        store
            .update(guild, |setup| {
                setup.channel = Some(100);
                setup.message = Some(200);
            })
            .await;
        let toggled = store
            .update(guild, |setup| {
                setup.stay_247 = !setup.stay_247;
                setup.stay_247
            })
            .await;
        assert!(toggled);

        let reopened = SetupStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get(guild),
            Some(GuildSetup {
                channel: Some(100),
                message: Some(200),
                dj_role: None,
                stay_247: true,
            })
        );
    }

    #[tokio::test]
    async fn test_file_uses_string_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("setup_channels.json");
        let store = SetupStore::open(&path).await.unwrap();
        store.update(GuildId::new(7), |s| s.dj_role = Some(9)).await;

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["7"]["dj_role"], 9);
        assert_eq!(raw["7"]["stay_247"], false);
        assert!(raw["7"].get("channel").is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("setup_channels.json");
        let store = SetupStore::open(&path).await.unwrap();
        store.update(GuildId::new(1), |s| s.channel = Some(5)).await;
        store.update(GuildId::new(2), |s| s.channel = Some(6)).await;

        assert!(store.remove(GuildId::new(1)).await.is_some());
        assert!(store.remove(GuildId::new(1)).await.is_none());

        let reopened = SetupStore::open(&path).await.unwrap();
        assert_eq!(reopened.guilds(), vec![GuildId::new(2)]);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("setup_channels.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = SetupStore::open(&path).await.unwrap();
        assert_eq!(store.len(), 0);
    }
}
