//! Owner-only grant management: `/grant`, `/revoke`, `/grants`.

use donkey_core::{
    access::{AccessGrant, AccessKind},
    domain::{ChatId, UserId},
    errors::Error,
    formatting::{escape_html, format_grant, format_grants_html},
    messaging::types::Command,
    utils::AuditEvent,
    Result,
};

use crate::router::AppState;

/// Parse `<kind> [ids]` into a validated grant.
///
/// Forms: `all`, `chat [chat_id]`, `global <user_id>`, `member <user_id> [chat_id]`.
/// Omitted chat ids default to `current_chat`.
pub(crate) fn parse_grant_args(args: &str, current_chat: ChatId) -> Result<AccessGrant> {
    let mut parts = args.split_whitespace();
    let kind: AccessKind = parts
        .next()
        .ok_or_else(|| Error::InvalidGrant("missing access kind".to_string()))?
        .parse()?;

    let (chat, user) = match kind {
        AccessKind::All => (None, None),
        AccessKind::ChatOnly => {
            let chat = parts.next().map(parse_id).transpose()?.map(ChatId);
            (Some(chat.unwrap_or(current_chat)), None)
        }
        AccessKind::GlobalUser => {
            let user = required_id(parts.next(), "user id")?;
            (None, Some(UserId(user)))
        }
        AccessKind::UserInChat => {
            let user = required_id(parts.next(), "user id")?;
            let chat = parts.next().map(parse_id).transpose()?.map(ChatId);
            (Some(chat.unwrap_or(current_chat)), Some(UserId(user)))
        }
    };

    if let Some(extra) = parts.next() {
        return Err(Error::InvalidGrant(format!("unexpected argument: {extra}")));
    }

    AccessGrant::new(kind, chat, user)
}

fn parse_id(s: &str) -> Result<i64> {
    s.parse::<i64>()
        .map_err(|_| Error::InvalidGrant(format!("not a numeric id: {s}")))
}

fn required_id(s: Option<&str>, what: &str) -> Result<i64> {
    parse_id(s.ok_or_else(|| Error::InvalidGrant(format!("missing {what}")))?)
}

fn usage(command: &str) -> String {
    format!(
        "🚧 Correct usage:\n\
/{command} all\n\
/{command} chat [chat_id]\n\
/{command} global &lt;user_id&gt;\n\
/{command} member &lt;user_id&gt; [chat_id]"
    )
}

/// Parse the arguments, answering with usage when they are malformed.
async fn parse_or_reply(state: &AppState, cmd: &Command) -> Result<Option<AccessGrant>> {
    match parse_grant_args(&cmd.args, cmd.chat_id) {
        Ok(grant) => Ok(Some(grant)),
        Err(Error::InvalidGrant(reason)) => {
            let text = format!("❗️ {}\n\n{}", escape_html(&reason), usage(&cmd.name));
            state.messenger.reply_html(cmd.message, &text).await?;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn audit(state: &AppState, cmd: &Command, grant: &AccessGrant) {
    let reason = format!(
        "{} chat={} user={}",
        grant.kind,
        grant.scope_chat.map(|c| c.to_string()).unwrap_or("-".to_string()),
        grant.scope_user.map(|u| u.to_string()).unwrap_or("-".to_string()),
    );
    state.audit.record(AuditEvent::grant(
        cmd.chat_id,
        cmd.user_id,
        cmd.username.as_deref(),
        &cmd.name,
        &reason,
    ));
}

pub(crate) async fn grant(state: &AppState, cmd: &Command) -> Result<()> {
    let Some(grant) = parse_or_reply(state, cmd).await? else {
        return Ok(());
    };

    let text = match state.store.grant_access(grant.clone()).await {
        Ok(stored) => {
            tracing::info!(
                owner = cmd.user_id.0,
                kind = %stored.kind,
                "access granted"
            );
            audit(state, cmd, &stored);
            format!("✅ Granted {}", format_grant(&stored))
        }
        Err(Error::Conflict(_)) => format!("ℹ️ Already granted: {}", format_grant(&grant)),
        Err(e) => return Err(e),
    };

    state.messenger.reply_html(cmd.message, &text).await?;
    Ok(())
}

pub(crate) async fn revoke(state: &AppState, cmd: &Command) -> Result<()> {
    let Some(grant) = parse_or_reply(state, cmd).await? else {
        return Ok(());
    };

    let (chat, user) = grant.scope();
    let text = if state.store.revoke_access(chat, user).await? {
        tracing::info!(owner = cmd.user_id.0, kind = %grant.kind, "access revoked");
        audit(state, cmd, &grant);
        format!("🗑️ Revoked {}", format_grant(&grant))
    } else {
        format!("ℹ️ No grant matches {}", format_grant(&grant))
    };

    state.messenger.reply_html(cmd.message, &text).await?;
    Ok(())
}

pub(crate) async fn list(state: &AppState, cmd: &Command) -> Result<()> {
    let grants = state.store.list_grants().await?;
    let max_len = state.messenger.capabilities().max_message_len;
    let text = format_grants_html(&grants, max_len);
    state.messenger.reply_html(cmd.message, &text).await?;
    Ok(())
}
