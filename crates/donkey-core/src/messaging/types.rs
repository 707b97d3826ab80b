use crate::domain::{ChatId, MessageRef, UserId};

/// Transport-neutral inbound command.
///
/// Telegram-specific fields live in the Telegram adapter.
#[derive(Clone, Debug)]
pub struct Command {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: Option<String>,
    pub message: MessageRef,
    pub name: String,
    pub args: String,
}

impl Command {
    /// Split `/cmd@botname rest` into a lowercase command name and trimmed arguments.
    ///
    /// Returns `None` for text that is not a command.
    pub fn parse(text: &str) -> Option<(String, String)> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }

        let mut parts = text.splitn(2, char::is_whitespace);
        let first = parts.next().unwrap_or("").trim();
        let rest = parts.next().unwrap_or("").trim().to_string();

        let name = first
            .trim_start_matches('/')
            .split('@')
            .next()
            .unwrap_or("")
            .to_lowercase();
        if name.is_empty() {
            return None;
        }

        Some((name, rest))
    }

    /// Arguments, or `None` when the command was sent bare.
    pub fn text_arg(&self) -> Option<&str> {
        let a = self.args.trim();
        if a.is_empty() {
            None
        } else {
            Some(a)
        }
    }
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub max_message_len: usize,
}
