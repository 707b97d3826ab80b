//! Access grants and the policy that evaluates them.
//!
//! A grant authorizes a scope (a chat, a user, a user inside one chat, or
//! everybody) to use access-gated commands. Evaluation is a plain disjunction
//! over the grant set: any matching grant authorizes, no grant denies.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    domain::{ChatId, UserId},
    errors::Error,
    utils::iso_timestamp_utc,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    /// Everyone in `scope_chat`.
    ChatOnly,
    /// `scope_user` in every chat.
    GlobalUser,
    /// `scope_user`, but only inside `scope_chat`.
    UserInChat,
    /// Unconditional override.
    All,
}

impl AccessKind {
    pub const ALL_KINDS: [AccessKind; 4] = [
        AccessKind::ChatOnly,
        AccessKind::GlobalUser,
        AccessKind::UserInChat,
        AccessKind::All,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AccessKind::ChatOnly => "chat",
            AccessKind::GlobalUser => "global",
            AccessKind::UserInChat => "member",
            AccessKind::All => "all",
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "chat" | "chat_only" => Ok(AccessKind::ChatOnly),
            "global" | "user" | "global_user" => Ok(AccessKind::GlobalUser),
            "member" | "user_in_chat" => Ok(AccessKind::UserInChat),
            "all" => Ok(AccessKind::All),
            other => Err(Error::InvalidGrant(format!("unknown access kind: {other}"))),
        }
    }
}

/// One authorization rule. Immutable once created; removed by revocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub scope_chat: Option<ChatId>,
    pub scope_user: Option<UserId>,
    pub kind: AccessKind,
    pub created_at: String,
}

impl AccessGrant {
    /// Build a grant, rejecting scope combinations the kind does not use.
    pub fn new(kind: AccessKind, scope_chat: Option<ChatId>, scope_user: Option<UserId>) -> Result<Self> {
        let grant = Self {
            scope_chat,
            scope_user,
            kind,
            created_at: iso_timestamp_utc(),
        };
        grant.validate()?;
        Ok(grant)
    }

    /// Check that the scope fits the kind; grants read back from disk go through this too.
    pub fn validate(&self) -> Result<()> {
        let (chat, user) = (self.scope_chat, self.scope_user);
        let ok = match self.kind {
            AccessKind::ChatOnly => chat.is_some() && user.is_none(),
            AccessKind::GlobalUser => chat.is_none() && user.is_some(),
            AccessKind::UserInChat => chat.is_some() && user.is_some(),
            AccessKind::All => chat.is_none() && user.is_none(),
        };
        if !ok {
            return Err(Error::InvalidGrant(format!(
                "kind {} does not accept scope chat={} user={}",
                self.kind,
                fmt_scope(chat.map(|c| c.0)),
                fmt_scope(user.map(|u| u.0)),
            )));
        }
        Ok(())
    }

    pub fn all() -> Self {
        Self {
            scope_chat: None,
            scope_user: None,
            kind: AccessKind::All,
            created_at: iso_timestamp_utc(),
        }
    }

    pub fn chat_only(chat_id: ChatId) -> Self {
        Self {
            scope_chat: Some(chat_id),
            scope_user: None,
            kind: AccessKind::ChatOnly,
            created_at: iso_timestamp_utc(),
        }
    }

    pub fn global_user(user_id: UserId) -> Self {
        Self {
            scope_chat: None,
            scope_user: Some(user_id),
            kind: AccessKind::GlobalUser,
            created_at: iso_timestamp_utc(),
        }
    }

    pub fn user_in_chat(chat_id: ChatId, user_id: UserId) -> Self {
        Self {
            scope_chat: Some(chat_id),
            scope_user: Some(user_id),
            kind: AccessKind::UserInChat,
            created_at: iso_timestamp_utc(),
        }
    }

    /// Scope key used for uniqueness and revocation.
    pub fn scope(&self) -> (Option<ChatId>, Option<UserId>) {
        (self.scope_chat, self.scope_user)
    }

    pub fn matches(&self, chat_id: ChatId, user_id: UserId) -> bool {
        match self.kind {
            AccessKind::All => true,
            AccessKind::GlobalUser => self.scope_user == Some(user_id),
            AccessKind::ChatOnly => self.scope_chat == Some(chat_id),
            AccessKind::UserInChat => {
                self.scope_chat == Some(chat_id) && self.scope_user == Some(user_id)
            }
        }
    }
}

fn fmt_scope(v: Option<i64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Default-deny evaluation over a grant set.
pub fn is_authorized(grants: &[AccessGrant], chat_id: ChatId, user_id: UserId) -> bool {
    grants.iter().any(|g| g.matches(chat_id, user_id))
}
