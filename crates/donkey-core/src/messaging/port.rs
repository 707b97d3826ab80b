use async_trait::async_trait;

use crate::{
    domain::MessageRef,
    messaging::types::MessagingCapabilities,
    Result,
};

/// Outbound messaging port used by the gate and the command handlers.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    /// Reply in the chat of `original`, quoting it where the messenger supports that.
    async fn reply_html(&self, original: MessageRef, html: &str) -> Result<MessageRef>;
}
