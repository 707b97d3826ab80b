use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    access::AccessGrant,
    domain::{ChatId, UserId},
    errors::Error,
    utils::iso_timestamp_utc,
    Result,
};

use super::{ChatConfig, ChatRecord, ConfigUpdate, Store, UserRecord};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    users: BTreeMap<UserId, UserRecord>,
    #[serde(default)]
    chats: BTreeMap<ChatId, ChatRecord>,
    #[serde(default)]
    configs: Vec<ChatConfig>,
    #[serde(default)]
    grants: Vec<AccessGrant>,
}

/// In-process store, optionally mirrored to a JSON snapshot file.
///
/// Every write is applied to a copy, persisted, then swapped in, so a failed
/// snapshot write leaves the visible state unchanged.
pub struct MemoryStore {
    data: RwLock<StoreData>,
    snapshot: Option<PathBuf>,
    revision: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Volatile store (tests, or `STORE_PATH` left empty).
    pub fn new() -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            snapshot: None,
            revision: AtomicU64::new(0),
        }
    }

    /// Load the snapshot at `path` if present; later writes are persisted there.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = load_snapshot(&path)?.unwrap_or_default();
        tracing::info!(
            path = %path.display(),
            users = data.users.len(),
            chats = data.chats.len(),
            grants = data.grants.len(),
            "store opened"
        );
        Ok(Self {
            data: RwLock::new(data),
            snapshot: Some(path),
            revision: AtomicU64::new(0),
        })
    }

    /// Number of successful writes since this store was created.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Apply `f` to a copy, persist it, then swap it in.
    ///
    /// The write lock stays held until the snapshot is on disk so writes reach
    /// the file in the order they were applied; the file I/O itself runs on the
    /// blocking pool.
    async fn mutate<T>(&self, f: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T> {
        let mut guard = self.data.write().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        if let Some(path) = &self.snapshot {
            let txt = serde_json::to_string_pretty(&next)?;
            let path = path.clone();
            tokio::task::spawn_blocking(move || save_snapshot(&path, &txt))
                .await
                .map_err(|e| Error::Storage(format!("snapshot task failed: {e}")))??;
        }
        *guard = next;
        self.revision.fetch_add(1, Ordering::SeqCst);
        Ok(out)
    }
}

fn load_snapshot(path: &Path) -> Result<Option<StoreData>> {
    if !path.exists() {
        return Ok(None);
    }
    let txt = std::fs::read_to_string(path)
        .map_err(|e| Error::Storage(format!("failed to read {}: {e}", path.display())))?;
    if txt.trim().is_empty() {
        return Ok(None);
    }
    let data: StoreData = serde_json::from_str(&txt)?;
    for grant in &data.grants {
        grant.validate()?;
    }
    Ok(Some(data))
}

fn save_snapshot(path: &Path, txt: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, txt)
        .and_then(|_| std::fs::rename(&tmp, path))
        .map_err(|e| Error::Storage(format!("failed to write {}: {e}", path.display())))
}

fn find_config(
    configs: &mut [ChatConfig],
    chat_id: ChatId,
    user_id: UserId,
) -> Option<&mut ChatConfig> {
    configs
        .iter_mut()
        .find(|c| c.chat_id == chat_id && c.user_id == user_id)
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>> {
        Ok(self.data.read().await.users.get(&user_id).cloned())
    }

    async fn register_user(&self, user_id: UserId) -> Result<UserRecord> {
        let rec = self
            .mutate(|d| {
                if d.users.contains_key(&user_id) {
                    return Err(Error::Conflict(format!("user {user_id} already registered")));
                }
                let rec = UserRecord {
                    user_id,
                    created_at: iso_timestamp_utc(),
                };
                d.users.insert(user_id, rec.clone());
                Ok(rec)
            })
            .await?;
        tracing::debug!(user_id = user_id.0, "user registered");
        Ok(rec)
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<Option<ChatRecord>> {
        Ok(self.data.read().await.chats.get(&chat_id).cloned())
    }

    async fn register_chat(&self, chat_id: ChatId) -> Result<ChatRecord> {
        let rec = self
            .mutate(|d| {
                if d.chats.contains_key(&chat_id) {
                    return Err(Error::Conflict(format!("chat {chat_id} already registered")));
                }
                let rec = ChatRecord {
                    chat_id,
                    created_at: iso_timestamp_utc(),
                };
                d.chats.insert(chat_id, rec.clone());
                Ok(rec)
            })
            .await?;
        tracing::debug!(chat_id = chat_id.0, "chat registered");
        Ok(rec)
    }

    async fn get_config(&self, chat_id: ChatId, user_id: UserId) -> Result<Option<ChatConfig>> {
        Ok(self
            .data
            .read()
            .await
            .configs
            .iter()
            .find(|c| c.chat_id == chat_id && c.user_id == user_id)
            .cloned())
    }

    async fn register_config(&self, config: ChatConfig) -> Result<ChatConfig> {
        let (chat_id, user_id) = (config.chat_id, config.user_id);
        let rec = self
            .mutate(|d| {
                if find_config(&mut d.configs, chat_id, user_id).is_some() {
                    return Err(Error::Conflict(format!(
                        "config for user {user_id} in chat {chat_id} already exists"
                    )));
                }
                d.configs.push(config.clone());
                Ok(config)
            })
            .await?;
        tracing::debug!(chat_id = chat_id.0, user_id = user_id.0, "config registered");
        Ok(rec)
    }

    async fn update_config(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        update: ConfigUpdate,
    ) -> Result<ChatConfig> {
        self.mutate(|d| {
            if find_config(&mut d.configs, chat_id, user_id).is_none() {
                d.configs.push(ChatConfig::with_defaults(chat_id, user_id));
            }
            let cfg = find_config(&mut d.configs, chat_id, user_id).ok_or_else(|| {
                Error::Storage(format!("config for user {user_id} in chat {chat_id} vanished"))
            })?;
            update.apply(cfg);
            Ok(cfg.clone())
        })
        .await
    }

    async fn delete_config(&self, chat_id: ChatId, user_id: UserId) -> Result<bool> {
        if self.get_config(chat_id, user_id).await?.is_none() {
            return Ok(false);
        }
        self.mutate(|d| {
            let before = d.configs.len();
            d.configs
                .retain(|c| !(c.chat_id == chat_id && c.user_id == user_id));
            Ok(d.configs.len() != before)
        })
        .await
    }

    async fn list_grants(&self) -> Result<Vec<AccessGrant>> {
        Ok(self.data.read().await.grants.clone())
    }

    async fn grant_access(&self, grant: AccessGrant) -> Result<AccessGrant> {
        self.mutate(|d| {
            if d.grants.iter().any(|g| g.scope() == grant.scope()) {
                return Err(Error::Conflict(format!(
                    "a grant for this scope already exists ({})",
                    grant.kind
                )));
            }
            d.grants.push(grant.clone());
            Ok(grant)
        })
        .await
    }

    async fn revoke_access(
        &self,
        chat_id: Option<ChatId>,
        user_id: Option<UserId>,
    ) -> Result<bool> {
        let exists = self
            .data
            .read()
            .await
            .grants
            .iter()
            .any(|g| g.scope() == (chat_id, user_id));
        if !exists {
            return Ok(false);
        }
        self.mutate(|d| {
            let before = d.grants.len();
            d.grants.retain(|g| g.scope() != (chat_id, user_id));
            Ok(d.grants.len() != before)
        })
        .await
    }
}
