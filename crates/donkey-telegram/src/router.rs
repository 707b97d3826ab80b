use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use donkey_core::{
    config::Config,
    cooldown::CooldownLimiter,
    gate::Gate,
    messaging::port::MessagingPort,
    store::Store,
    utils::AuditLogger,
};

use crate::handlers;
use crate::TelegramMessenger;

/// Everything a command handler needs, shared across update tasks.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub gate: Arc<Gate>,
    pub messenger: Arc<dyn MessagingPort>,
    pub audit: Arc<AuditLogger>,
}

impl AppState {
    pub fn new(cfg: Arc<Config>, store: Arc<dyn Store>, messenger: Arc<dyn MessagingPort>) -> Self {
        let audit = Arc::new(AuditLogger::new(
            cfg.audit_log_path.clone(),
            cfg.audit_log_json,
        ));
        let gate = Gate::new(
            store.clone(),
            Arc::new(CooldownLimiter::new()),
            cfg.owners.clone(),
        )
        .with_cooldowns_enabled(cfg.rate_limit_enabled)
        .with_audit(audit.clone());

        Self {
            cfg,
            store,
            gate: Arc::new(gate),
            messenger,
            audit,
        }
    }
}

pub async fn run_polling(cfg: Arc<Config>, store: Arc<dyn Store>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    // Basic startup info.
    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "smart donkey started"),
        Err(e) => tracing::warn!(error = %e, "get_me failed"),
    }
    tracing::info!(
        owners = cfg.owners.len(),
        rate_limit = cfg.rate_limit_enabled,
        audit_log = %cfg.audit_log_path.display(),
        "configuration loaded"
    );

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let state = Arc::new(AppState::new(cfg, store, messenger));

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
