use donkey_core::{
    formatting::format_config_html,
    gate::{AdmissionRequest, Admitted, CommandPolicy},
    messaging::types::Command,
    store::ConfigUpdate,
    Result,
};

use crate::router::AppState;

use super::admin;

/// Seconds between two configuration changes by the same user.
const CONFIG_COOLDOWN_SECS: u64 = 3;

/// Command table: admission policy per command, `None` for commands we ignore.
pub(crate) fn policy_for(name: &str) -> Option<CommandPolicy> {
    let policy = match name {
        "start" | "help" => CommandPolicy::OPEN,
        "config" => CommandPolicy::GATED,
        "instruction" | "reset" => CommandPolicy::GATED.with_cooldown_secs(CONFIG_COOLDOWN_SECS),
        "grant" | "revoke" | "grants" => CommandPolicy::OWNER,
        _ => return None,
    };
    Some(policy)
}

/// Run one command through the gate and, if admitted, its handler.
pub async fn dispatch(state: &AppState, cmd: &Command) -> Result<()> {
    let Some(policy) = policy_for(&cmd.name) else {
        tracing::debug!(command = %cmd.name, "ignoring unknown command");
        return Ok(());
    };

    let req = AdmissionRequest::from(cmd);
    state
        .gate
        .run(&req, policy, state.messenger.as_ref(), |admitted| {
            handle_command(state, cmd, admitted)
        })
        .await?;
    Ok(())
}

async fn handle_command(state: &AppState, cmd: &Command, admitted: Admitted) -> Result<()> {
    match cmd.name.as_str() {
        "start" => start(state, cmd, admitted).await,
        "help" => help(state, cmd).await,
        "config" => show_config(state, cmd).await,
        "instruction" => set_instruction(state, cmd).await,
        "reset" => reset_config(state, cmd).await,
        "grant" => admin::grant(state, cmd).await,
        "revoke" => admin::revoke(state, cmd).await,
        "grants" => admin::list(state, cmd).await,
        _ => Ok(()),
    }
}

async fn start(state: &AppState, cmd: &Command, admitted: Admitted) -> Result<()> {
    let text = if admitted.registration.user_created {
        "👋 Welcome to Smart Donkey Bot!\n\nType /help to see what I can do for you!"
    } else {
        "Welcome back! How can I assist you today?"
    };
    state.messenger.reply_html(cmd.message, text).await?;
    Ok(())
}

async fn help(state: &AppState, cmd: &Command) -> Result<()> {
    let mut text = String::from(
        "🫏 <b>Smart Donkey</b>\n\n\
/start - register and say hello\n\
/help - this message\n\
/config - show your configuration\n\
/instruction &lt;text&gt; - set your instructions\n\
/reset - restore the default configuration",
    );
    if state.gate.is_owner(cmd.user_id) {
        text.push_str(
            "\n\n<b>Owner</b>\n\
/grant &lt;kind&gt; [ids] - allow a chat or user\n\
/revoke &lt;kind&gt; [ids] - remove a grant\n\
/grants - list grants",
        );
    }
    state.messenger.reply_html(cmd.message, &text).await?;
    Ok(())
}

async fn show_config(state: &AppState, cmd: &Command) -> Result<()> {
    let cfg = match state.store.get_config(cmd.chat_id, cmd.user_id).await? {
        Some(cfg) => cfg,
        None => {
            state
                .store
                .update_config(cmd.chat_id, cmd.user_id, ConfigUpdate::default())
                .await?
        }
    };
    state
        .messenger
        .reply_html(cmd.message, &format_config_html(&cfg))
        .await?;
    Ok(())
}

async fn set_instruction(state: &AppState, cmd: &Command) -> Result<()> {
    let Some(text) = cmd.text_arg() else {
        state
            .messenger
            .reply_html(
                cmd.message,
                "🚧 Correct usage:\n  -> /instruction <b>text</b>",
            )
            .await?;
        return Ok(());
    };

    let update = ConfigUpdate {
        instructions: Some(Some(text.to_string())),
        ..ConfigUpdate::default()
    };
    state
        .store
        .update_config(cmd.chat_id, cmd.user_id, update)
        .await?;
    state
        .messenger
        .reply_html(cmd.message, "✏️ instructions updated successfully!")
        .await?;
    Ok(())
}

async fn reset_config(state: &AppState, cmd: &Command) -> Result<()> {
    state.store.delete_config(cmd.chat_id, cmd.user_id).await?;
    // A missing config is recreated from defaults.
    state
        .store
        .update_config(cmd.chat_id, cmd.user_id, ConfigUpdate::default())
        .await?;
    state
        .messenger
        .reply_html(cmd.message, "🔄 Configuration reset to defaults.")
        .await?;
    Ok(())
}
