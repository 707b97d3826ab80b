//! Admission gate applied by the dispatch layer before every command handler.
//!
//! The gate runs a fixed, ordered pipeline (see [`Gate::PIPELINE`]):
//!
//! 1. `Register` - make sure user, chat and the (chat, user) config exist
//! 2. `Owner` - owner-only commands drop everybody else silently
//! 3. `Access` - access-gated commands drop unauthorized pairs silently
//! 4. `Cooldown` - cooldown-gated commands reply with the remaining wait
//!
//! Access is evaluated before the cooldown so a rejected probe never touches the
//! limiter. Storage errors and handler errors propagate to the caller.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::Instant;

use crate::{
    cooldown::{CooldownLimiter, Permit, Wait},
    domain::{ChatId, MessageRef, UserId},
    errors::Error,
    messaging::{port::MessagingPort, types::Command},
    store::{ChatConfig, Store},
    utils::{AuditEvent, AuditLogger},
    Result,
};

/// Admission requirements declared by a command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandPolicy {
    pub owner_only: bool,
    pub access_gated: bool,
    pub cooldown: Option<Duration>,
}

impl CommandPolicy {
    /// Registration only.
    pub const OPEN: Self = Self {
        owner_only: false,
        access_gated: false,
        cooldown: None,
    };

    pub const GATED: Self = Self {
        owner_only: false,
        access_gated: true,
        cooldown: None,
    };

    pub const OWNER: Self = Self {
        owner_only: true,
        access_gated: false,
        cooldown: None,
    };

    pub const fn with_cooldown_secs(self, secs: u64) -> Self {
        Self {
            cooldown: Some(Duration::from_secs(secs)),
            ..self
        }
    }
}

/// Who is asking, for which command, and where to reply.
#[derive(Clone, Debug)]
pub struct AdmissionRequest {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: Option<String>,
    pub command: String,
    pub message: MessageRef,
}

impl From<&Command> for AdmissionRequest {
    fn from(cmd: &Command) -> Self {
        Self {
            chat_id: cmd.chat_id,
            user_id: cmd.user_id,
            username: cmd.username.clone(),
            command: cmd.name.clone(),
            message: cmd.message,
        }
    }
}

/// Rows the `Register` step had to create.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Registration {
    pub user_created: bool,
    pub chat_created: bool,
    pub config_created: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionStep {
    Register,
    Owner,
    Access,
    Cooldown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Owner-only command from a non-owner. Silent.
    NotOwner,
    /// No grant matches. Silent, so probers learn nothing about the bot.
    Unauthorized,
    /// Cooldown still running. The user is told how long to wait.
    RateLimited(Wait),
}

impl Rejection {
    /// Text sent back to the user, if this rejection is visible at all.
    pub fn reply_text(&self) -> Option<String> {
        match self {
            Rejection::NotOwner | Rejection::Unauthorized => None,
            Rejection::RateLimited(wait) => Some(format!(
                "⌛️ Please wait {} seconds before making another request.",
                wait.remaining_display()
            )),
        }
    }
}

/// Context handed to an admitted handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admitted {
    pub registration: Registration,
    pub permit: Option<Permit>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted(Admitted),
    Rejected(Rejection),
}

pub struct Gate {
    store: Arc<dyn Store>,
    limiter: Arc<CooldownLimiter>,
    owners: Vec<i64>,
    cooldowns_enabled: bool,
    audit: Option<Arc<AuditLogger>>,
}

impl Gate {
    pub const PIPELINE: [AdmissionStep; 4] = [
        AdmissionStep::Register,
        AdmissionStep::Owner,
        AdmissionStep::Access,
        AdmissionStep::Cooldown,
    ];

    pub fn new(store: Arc<dyn Store>, limiter: Arc<CooldownLimiter>, owners: Vec<i64>) -> Self {
        Self {
            store,
            limiter,
            owners,
            cooldowns_enabled: true,
            audit: None,
        }
    }

    pub fn with_cooldowns_enabled(mut self, enabled: bool) -> Self {
        self.cooldowns_enabled = enabled;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn limiter(&self) -> &Arc<CooldownLimiter> {
        &self.limiter
    }

    pub fn is_owner(&self, user_id: UserId) -> bool {
        self.owners.contains(&user_id.0)
    }

    /// Run the pipeline, then the handler if admitted.
    ///
    /// Returns `Ok(None)` when the request was rejected. A rate-limit rejection
    /// is answered with a reply to the original message before returning.
    pub async fn run<T, F, Fut>(
        &self,
        req: &AdmissionRequest,
        policy: CommandPolicy,
        messenger: &dyn MessagingPort,
        handler: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce(Admitted) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.admit(req, policy).await? {
            Admission::Admitted(admitted) => handler(admitted).await.map(Some),
            Admission::Rejected(rejection) => {
                if let Some(text) = rejection.reply_text() {
                    messenger.reply_html(req.message, &text).await?;
                }
                Ok(None)
            }
        }
    }

    pub async fn admit(&self, req: &AdmissionRequest, policy: CommandPolicy) -> Result<Admission> {
        let mut registration = Registration::default();
        let mut permit = None;

        for step in Self::PIPELINE {
            let rejection = match step {
                AdmissionStep::Register => {
                    registration = self.ensure_registered(req.chat_id, req.user_id).await?;
                    None
                }
                AdmissionStep::Owner => self.check_owner(req, policy),
                AdmissionStep::Access => self.check_access(req, policy).await?,
                AdmissionStep::Cooldown => match self.check_cooldown(req, policy) {
                    Ok(p) => {
                        permit = p;
                        None
                    }
                    Err(r) => Some(r),
                },
            };

            if let Some(rejection) = rejection {
                self.record_rejection(req, rejection);
                return Ok(Admission::Rejected(rejection));
            }
        }

        Ok(Admission::Admitted(Admitted {
            registration,
            permit,
        }))
    }

    /// Look up user, chat and config; create whichever is missing.
    ///
    /// A `Conflict` from a concurrent registration of the same row counts as
    /// "already present".
    pub async fn ensure_registered(&self, chat_id: ChatId, user_id: UserId) -> Result<Registration> {
        let user_created = if self.store.get_user(user_id).await?.is_none() {
            created(self.store.register_user(user_id).await)?
        } else {
            false
        };

        let chat_created = if self.store.get_chat(chat_id).await?.is_none() {
            created(self.store.register_chat(chat_id).await)?
        } else {
            false
        };

        let config_created = if self.store.get_config(chat_id, user_id).await?.is_none() {
            let cfg = ChatConfig::with_defaults(chat_id, user_id);
            created(self.store.register_config(cfg).await)?
        } else {
            false
        };

        Ok(Registration {
            user_created,
            chat_created,
            config_created,
        })
    }

    pub fn check_owner(&self, req: &AdmissionRequest, policy: CommandPolicy) -> Option<Rejection> {
        if policy.owner_only && !self.is_owner(req.user_id) {
            tracing::warn!(
                user_id = req.user_id.0,
                command = %req.command,
                "owner-only command from non-owner"
            );
            return Some(Rejection::NotOwner);
        }
        None
    }

    pub async fn check_access(
        &self,
        req: &AdmissionRequest,
        policy: CommandPolicy,
    ) -> Result<Option<Rejection>> {
        if !policy.access_gated {
            return Ok(None);
        }
        if self.store.has_access(req.chat_id, req.user_id).await? {
            tracing::debug!(user_id = req.user_id.0, chat_id = req.chat_id.0, "access granted");
            return Ok(None);
        }
        tracing::warn!(
            user_id = req.user_id.0,
            chat_id = req.chat_id.0,
            command = %req.command,
            "user not authorized"
        );
        Ok(Some(Rejection::Unauthorized))
    }

    pub fn check_cooldown(
        &self,
        req: &AdmissionRequest,
        policy: CommandPolicy,
    ) -> std::result::Result<Option<Permit>, Rejection> {
        self.check_cooldown_at(req, policy, Instant::now())
    }

    pub fn check_cooldown_at(
        &self,
        req: &AdmissionRequest,
        policy: CommandPolicy,
        now: Instant,
    ) -> std::result::Result<Option<Permit>, Rejection> {
        let Some(cooldown) = policy.cooldown else {
            return Ok(None);
        };
        if !self.cooldowns_enabled {
            return Ok(None);
        }
        match self.limiter.try_acquire_at(req.user_id, cooldown, now) {
            Ok(permit) => Ok(Some(permit)),
            Err(wait) => {
                tracing::info!(
                    user_id = req.user_id.0,
                    command = %req.command,
                    remaining = %wait.remaining_display(),
                    "cooldown active"
                );
                Err(Rejection::RateLimited(wait))
            }
        }
    }

    fn record_rejection(&self, req: &AdmissionRequest, rejection: Rejection) {
        let Some(audit) = &self.audit else {
            return;
        };
        let username = req.username.as_deref();
        let event = match rejection {
            Rejection::NotOwner | Rejection::Unauthorized => {
                AuditEvent::auth(req.chat_id, req.user_id, username, &req.command, false)
            }
            Rejection::RateLimited(wait) => AuditEvent::rate_limit(
                req.chat_id,
                req.user_id,
                username,
                &req.command,
                wait.remaining.as_secs_f64(),
            ),
        };
        audit.record(event);
    }
}

fn created<T>(res: Result<T>) -> Result<bool> {
    match res {
        Ok(_) => Ok(true),
        Err(Error::Conflict(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        future::{ready, Ready},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        access::AccessGrant,
        domain::MessageId,
        messaging::types::MessagingCapabilities,
        store::{ChatRecord, ConfigUpdate, MemoryStore, UserRecord},
    };

    const C: ChatId = ChatId(-1001);
    const U: UserId = UserId(501);
    const OWNER: UserId = UserId(1);

    #[derive(Default)]
    struct FakeMessenger {
        replies: Mutex<Vec<(MessageRef, String)>>,
    }

    impl FakeMessenger {
        fn replies(&self) -> Vec<String> {
            self.replies
                .lock()
                .unwrap()
                .iter()
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                max_message_len: 4096,
            }
        }

        async fn reply_html(&self, original: MessageRef, html: &str) -> Result<MessageRef> {
            self.replies
                .lock()
                .unwrap()
                .push((original, html.to_string()));
            Ok(original)
        }
    }

    /// Every call fails as if the database were down.
    struct DownStore;

    #[async_trait]
    impl Store for DownStore {
        async fn get_user(&self, _: UserId) -> Result<Option<UserRecord>> {
            Err(Error::Storage("connection refused".into()))
        }
        async fn register_user(&self, _: UserId) -> Result<UserRecord> {
            Err(Error::Storage("connection refused".into()))
        }
        async fn get_chat(&self, _: ChatId) -> Result<Option<ChatRecord>> {
            Err(Error::Storage("connection refused".into()))
        }
        async fn register_chat(&self, _: ChatId) -> Result<ChatRecord> {
            Err(Error::Storage("connection refused".into()))
        }
        async fn get_config(&self, _: ChatId, _: UserId) -> Result<Option<ChatConfig>> {
            Err(Error::Storage("connection refused".into()))
        }
        async fn register_config(&self, _: ChatConfig) -> Result<ChatConfig> {
            Err(Error::Storage("connection refused".into()))
        }
        async fn update_config(&self, _: ChatId, _: UserId, _: ConfigUpdate) -> Result<ChatConfig> {
            Err(Error::Storage("connection refused".into()))
        }
        async fn delete_config(&self, _: ChatId, _: UserId) -> Result<bool> {
            Err(Error::Storage("connection refused".into()))
        }
        async fn list_grants(&self) -> Result<Vec<AccessGrant>> {
            Err(Error::Storage("connection refused".into()))
        }
        async fn grant_access(&self, _: AccessGrant) -> Result<AccessGrant> {
            Err(Error::Storage("connection refused".into()))
        }
        async fn revoke_access(&self, _: Option<ChatId>, _: Option<UserId>) -> Result<bool> {
            Err(Error::Storage("connection refused".into()))
        }
    }

    fn request(chat_id: ChatId, user_id: UserId, command: &str) -> AdmissionRequest {
        AdmissionRequest {
            chat_id,
            user_id,
            username: Some("tester".to_string()),
            command: command.to_string(),
            message: MessageRef {
                chat_id,
                message_id: MessageId(10),
            },
        }
    }

    /// Handler that only counts its invocations.
    fn counting(calls: &AtomicUsize) -> impl FnOnce(Admitted) -> Ready<Result<()>> + Copy + '_ {
        move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            ready(Ok(()))
        }
    }

    fn gate_with(store: Arc<MemoryStore>) -> Gate {
        Gate::new(store, Arc::new(CooldownLimiter::new()), vec![OWNER.0])
    }

    #[tokio::test]
    async fn unauthorized_gated_command_is_dropped_silently() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate_with(store.clone());
        let messenger = FakeMessenger::default();
        let calls = AtomicUsize::new(0);

        let out = gate
            .run(&request(C, U, "config"), CommandPolicy::GATED, &messenger, counting(&calls))
            .await
            .unwrap();

        assert_eq!(out, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(messenger.replies().is_empty());
    }

    #[tokio::test]
    async fn user_in_chat_grant_admits_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        store
            .grant_access(AccessGrant::user_in_chat(C, U))
            .await
            .unwrap();
        let gate = gate_with(store.clone());
        let messenger = FakeMessenger::default();
        let calls = AtomicUsize::new(0);

        let out = gate
            .run(&request(C, U, "config"), CommandPolicy::GATED, &messenger, counting(&calls))
            .await
            .unwrap();

        assert_eq!(out, Some(()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(messenger.replies().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_denies_inside_window_and_reports_remaining() {
        let store = Arc::new(MemoryStore::new());
        store.grant_access(AccessGrant::all()).await.unwrap();
        let gate = gate_with(store);
        let messenger = FakeMessenger::default();
        let policy = CommandPolicy::GATED.with_cooldown_secs(3);
        let req = request(C, U, "instruction");
        let calls = AtomicUsize::new(0);

        let handler = counting(&calls);

        // t=0
        assert!(gate.run(&req, policy, &messenger, handler).await.unwrap().is_some());

        // t=1
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(gate.run(&req, policy, &messenger, handler).await.unwrap().is_none());
        let replies = messenger.replies();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains("2.0"), "reply was: {}", replies[0]);

        // t=4
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(gate.run(&req, policy, &messenger, handler).await.unwrap().is_some());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(messenger.replies().len(), 1);
    }

    #[tokio::test]
    async fn registration_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate_with(store.clone());

        let first = gate.ensure_registered(C, U).await.unwrap();
        assert_eq!(
            first,
            Registration {
                user_created: true,
                chat_created: true,
                config_created: true,
            }
        );
        let writes = store.revision();
        assert_eq!(writes, 3);

        let second = gate.ensure_registered(C, U).await.unwrap();
        assert_eq!(second, Registration::default());
        assert_eq!(store.revision(), writes);

        // Same user in another chat only adds the chat and its config.
        let other = gate.ensure_registered(ChatId(-2002), U).await.unwrap();
        assert!(!other.user_created);
        assert!(other.chat_created && other.config_created);
    }

    #[tokio::test]
    async fn missing_config_is_created_with_defaults() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate_with(store.clone());
        gate.admit(&request(C, U, "start"), CommandPolicy::OPEN)
            .await
            .unwrap();

        let cfg = store.get_config(C, U).await.unwrap().unwrap();
        assert_eq!(cfg.language_model, "gpt-4o");
        assert_eq!(cfg.provider, "Blackbox");
        assert_eq!(cfg.image_model.as_deref(), Some("flux"));
        assert!(!cfg.streaming);
        assert_eq!(
            cfg.instructions.as_deref(),
            Some(crate::defaults::DEFAULT_INSTRUCTIONS)
        );
    }

    #[tokio::test]
    async fn unauthorized_probe_does_not_consume_cooldown() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate_with(store.clone());
        let policy = CommandPolicy::GATED.with_cooldown_secs(3);

        let out = gate.admit(&request(C, U, "instruction"), policy).await.unwrap();
        assert_eq!(out, Admission::Rejected(Rejection::Unauthorized));
        assert_eq!(gate.limiter().last_request_at(U), None);

        // Once granted, the very next request is admitted right away.
        store.grant_access(AccessGrant::global_user(U)).await.unwrap();
        let out = gate.admit(&request(C, U, "instruction"), policy).await.unwrap();
        assert!(matches!(out, Admission::Admitted(_)));
    }

    #[tokio::test]
    async fn owner_only_commands_ignore_grants() {
        let store = Arc::new(MemoryStore::new());
        store.grant_access(AccessGrant::all()).await.unwrap();
        let gate = gate_with(store);
        let messenger = FakeMessenger::default();

        let out = gate
            .run(&request(C, U, "grant"), CommandPolicy::OWNER, &messenger, |_| async {
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(out, None);
        assert!(messenger.replies().is_empty());

        let out = gate
            .run(&request(C, OWNER, "grant"), CommandPolicy::OWNER, &messenger, |_| async {
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(out, Some(()));
    }

    #[tokio::test]
    async fn disabled_cooldowns_skip_the_limiter() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate_with(store).with_cooldowns_enabled(false);
        let policy = CommandPolicy::OPEN.with_cooldown_secs(3);

        for _ in 0..3 {
            let out = gate.admit(&request(C, U, "reset"), policy).await.unwrap();
            assert!(matches!(
                out,
                Admission::Admitted(Admitted { permit: None, .. })
            ));
        }
        assert_eq!(gate.limiter().tracked_users(), 0);
    }

    #[tokio::test]
    async fn cooldown_step_checked_in_isolation() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate_with(store);
        let req = request(C, U, "instruction");
        let t0 = Instant::now();
        let policy = CommandPolicy::OPEN.with_cooldown_secs(3);

        assert!(gate.check_cooldown_at(&req, CommandPolicy::OPEN, t0).unwrap().is_none());
        assert!(gate.check_cooldown_at(&req, policy, t0).unwrap().is_some());
        let rejection = gate
            .check_cooldown_at(&req, policy, t0 + Duration::from_millis(500))
            .unwrap_err();
        assert_eq!(
            rejection.reply_text().as_deref(),
            Some("⌛️ Please wait 2.5 seconds before making another request.")
        );
    }

    #[tokio::test]
    async fn storage_failure_propagates_and_skips_handler() {
        let gate = Gate::new(Arc::new(DownStore), Arc::new(CooldownLimiter::new()), vec![]);
        let messenger = FakeMessenger::default();
        let calls = AtomicUsize::new(0);

        let err = gate
            .run(&request(C, U, "config"), CommandPolicy::GATED, &messenger, counting(&calls))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_failure_propagates_unchanged() {
        let gate = gate_with(Arc::new(MemoryStore::new()));
        let messenger = FakeMessenger::default();

        let err = gate
            .run(&request(C, U, "start"), CommandPolicy::OPEN, &messenger, |_| async {
                Err::<(), _>(Error::External("provider timed out".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::External(ref s) if s == "provider timed out"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_requests_from_new_user_admit_exactly_one() {
        const N: usize = 16;
        let store = Arc::new(MemoryStore::new());
        let gate = Arc::new(gate_with(store.clone()));
        let policy = CommandPolicy::OPEN.with_cooldown_secs(60);

        let tasks: Vec<_> = (0..N)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.admit(&request(C, U, "reset"), policy).await })
            })
            .collect();

        let mut admitted = 0;
        let mut limited = 0;
        for t in tasks {
            match t.await.unwrap().unwrap() {
                Admission::Admitted(_) => admitted += 1,
                Admission::Rejected(Rejection::RateLimited(_)) => limited += 1,
                other => panic!("unexpected admission: {other:?}"),
            }
        }

        assert_eq!(admitted, 1);
        assert_eq!(limited, N - 1);
        assert!(store.get_user(U).await.unwrap().is_some());
        assert!(store.get_config(C, U).await.unwrap().is_some());
    }
}
