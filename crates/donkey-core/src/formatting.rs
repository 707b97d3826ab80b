use crate::{access::AccessGrant, store::ChatConfig};

/// Escape text for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render a user's chat configuration.
pub fn format_config_html(cfg: &ChatConfig) -> String {
    let streaming = if cfg.streaming { "Enabled" } else { "Disabled" };
    let image_model = cfg.image_model.as_deref().unwrap_or("none");
    let instructions = cfg.instructions.as_deref().unwrap_or("none");

    format!(
        "⚙️ <b>Your configuration</b>\n\n\
🌐 Provider: <code>{}</code>\n\
💬 Language model: <code>{}</code>\n\
🖼️ Image model: <code>{}</code>\n\
📡 Streaming: {streaming}\n\n\
✏️ Instructions:\n<i>{}</i>",
        escape_html(&cfg.provider),
        escape_html(&cfg.language_model),
        escape_html(image_model),
        escape_html(instructions),
    )
}

/// One-line description of a grant's scope.
pub fn format_grant(grant: &AccessGrant) -> String {
    let mut out = format!("<b>{}</b>", grant.kind);
    if let Some(chat) = grant.scope_chat {
        out.push_str(&format!(" chat=<code>{chat}</code>"));
    }
    if let Some(user) = grant.scope_user {
        out.push_str(&format!(" user=<code>{user}</code>"));
    }
    out
}

/// Render the grant list for `/grants`, keeping the text within `max_len` chars.
///
/// Whole entries are dropped from the end and replaced by an "… and N more"
/// line, so every tag stays closed.
pub fn format_grants_html(grants: &[AccessGrant], max_len: usize) -> String {
    if grants.is_empty() {
        return "🔒 No access grants. Gated commands are closed to everyone.".to_string();
    }

    let mut out = format!("🔑 <b>Access grants</b> ({})\n", grants.len());
    let footer_reserve = format!("\n… and {} more", grants.len()).chars().count();
    let mut used = out.chars().count();

    for (idx, g) in grants.iter().enumerate() {
        let line = format!("\n{}. {}", idx + 1, format_grant(g));
        let line_len = line.chars().count();
        let is_last = idx + 1 == grants.len();
        let budget = if is_last {
            max_len
        } else {
            max_len.saturating_sub(footer_reserve)
        };
        if used + line_len > budget {
            out.push_str(&format!("\n… and {} more", grants.len() - idx));
            break;
        }
        out.push_str(&line);
        used += line_len;
    }
    out
}
