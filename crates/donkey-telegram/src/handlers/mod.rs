//! Telegram update handlers.
//!
//! Each inbound text message is turned into a transport-neutral
//! [`Command`], looked up in the command table and run through the gate.
//! Plain text and unknown commands are ignored.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use donkey_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    messaging::types::Command,
    utils::AuditEvent,
};

use crate::router::AppState;

mod admin;
mod commands;

pub use commands::dispatch;

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(cmd) = to_command(&msg) else {
        return Ok(());
    };

    if let Err(e) = dispatch(&state, &cmd).await {
        tracing::error!(
            chat_id = cmd.chat_id.0,
            user_id = cmd.user_id.0,
            command = %cmd.name,
            error = %e,
            "command failed"
        );
        state.audit.record(AuditEvent::error(
            cmd.chat_id,
            cmd.user_id,
            cmd.username.as_deref(),
            &cmd.name,
            &e.to_string(),
        ));
    }

    Ok(())
}

fn to_command(msg: &Message) -> Option<Command> {
    let text = msg.text()?;
    let from = msg.from()?;
    let (name, args) = Command::parse(text)?;

    let chat_id = ChatId(msg.chat.id.0);
    Some(Command {
        chat_id,
        user_id: UserId(from.id.0 as i64),
        username: from.username.clone(),
        message: MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        },
        name,
        args,
    })
}
