//! Persistence port for users, chats, per-user chat configuration and access grants.
//!
//! The gate only needs lookups and inserts; the command handlers additionally
//! update and delete configuration and manage grants.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    access::{is_authorized, AccessGrant},
    defaults,
    domain::{ChatId, UserId},
    utils::iso_timestamp_utc,
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: UserId,
    pub created_at: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub chat_id: ChatId,
    pub created_at: String,
}

/// Model/provider preferences of one user inside one chat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatConfig {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub language_model: String,
    pub provider: String,
    pub image_model: Option<String>,
    pub streaming: bool,
    pub instructions: Option<String>,
    pub created_at: String,
}

impl ChatConfig {
    pub fn with_defaults(chat_id: ChatId, user_id: UserId) -> Self {
        Self {
            chat_id,
            user_id,
            language_model: defaults::DEFAULT_LANGUAGE_MODEL.to_string(),
            provider: defaults::DEFAULT_PROVIDER.to_string(),
            image_model: Some(defaults::DEFAULT_IMAGE_MODEL.to_string()),
            streaming: defaults::DEFAULT_STREAMING,
            instructions: Some(defaults::DEFAULT_INSTRUCTIONS.to_string()),
            created_at: iso_timestamp_utc(),
        }
    }
}

/// Partial update applied by [`Store::update_config`]; `None` leaves a field untouched.
#[derive(Clone, Debug, Default)]
pub struct ConfigUpdate {
    pub language_model: Option<String>,
    pub provider: Option<String>,
    pub image_model: Option<Option<String>>,
    pub streaming: Option<bool>,
    pub instructions: Option<Option<String>>,
}

impl ConfigUpdate {
    pub fn apply(self, cfg: &mut ChatConfig) {
        if let Some(v) = self.language_model {
            cfg.language_model = v;
        }
        if let Some(v) = self.provider {
            cfg.provider = v;
        }
        if let Some(v) = self.image_model {
            cfg.image_model = v;
        }
        if let Some(v) = self.streaming {
            cfg.streaming = v;
        }
        if let Some(v) = self.instructions {
            cfg.instructions = v;
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>>;
    /// Fails with `Error::Conflict` if the user already exists.
    async fn register_user(&self, user_id: UserId) -> Result<UserRecord>;

    async fn get_chat(&self, chat_id: ChatId) -> Result<Option<ChatRecord>>;
    /// Fails with `Error::Conflict` if the chat already exists.
    async fn register_chat(&self, chat_id: ChatId) -> Result<ChatRecord>;

    async fn get_config(&self, chat_id: ChatId, user_id: UserId) -> Result<Option<ChatConfig>>;
    /// Fails with `Error::Conflict` if a config for the pair already exists.
    async fn register_config(&self, config: ChatConfig) -> Result<ChatConfig>;
    /// Updates the pair's config, creating it from defaults first if missing.
    async fn update_config(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        update: ConfigUpdate,
    ) -> Result<ChatConfig>;
    async fn delete_config(&self, chat_id: ChatId, user_id: UserId) -> Result<bool>;

    async fn list_grants(&self) -> Result<Vec<AccessGrant>>;
    /// Fails with `Error::Conflict` if a grant with the same scope exists.
    async fn grant_access(&self, grant: AccessGrant) -> Result<AccessGrant>;
    /// Removes the grant whose scope is exactly `(chat_id, user_id)`.
    async fn revoke_access(&self, chat_id: Option<ChatId>, user_id: Option<UserId>)
        -> Result<bool>;

    async fn has_access(&self, chat_id: ChatId, user_id: UserId) -> Result<bool> {
        let grants = self.list_grants().await?;
        Ok(is_authorized(&grants, chat_id, user_id))
    }
}
