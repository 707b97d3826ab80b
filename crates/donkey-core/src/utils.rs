use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{
    domain::{ChatId, UserId},
    errors::Error,
    Result,
};

// ============== Timestamp Helpers ==============

/// RFC3339 timestamp in UTC (for records and logs).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

// ============== Audit Logging ==============

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    fn base(event: &str, chat_id: ChatId, user_id: UserId, username: Option<&str>) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: event.to_string(),
            chat_id: Some(chat_id.0),
            user_id: Some(user_id.0),
            username: username.map(|s| s.to_string()),
            command: None,
            authorized: None,
            retry_after: None,
            reason: None,
            error: None,
        }
    }

    pub fn auth(
        chat_id: ChatId,
        user_id: UserId,
        username: Option<&str>,
        command: &str,
        authorized: bool,
    ) -> Self {
        Self {
            command: Some(command.to_string()),
            authorized: Some(authorized),
            ..Self::base("auth", chat_id, user_id, username)
        }
    }

    pub fn rate_limit(
        chat_id: ChatId,
        user_id: UserId,
        username: Option<&str>,
        command: &str,
        retry_after: f64,
    ) -> Self {
        Self {
            command: Some(command.to_string()),
            retry_after: Some(retry_after),
            ..Self::base("rate_limit", chat_id, user_id, username)
        }
    }

    /// Owner-issued grant/revoke, with `reason` describing the scope touched.
    pub fn grant(
        chat_id: ChatId,
        user_id: UserId,
        username: Option<&str>,
        command: &str,
        reason: &str,
    ) -> Self {
        Self {
            command: Some(command.to_string()),
            reason: Some(reason.to_string()),
            ..Self::base("grant", chat_id, user_id, username)
        }
    }

    pub fn error(
        chat_id: ChatId,
        user_id: UserId,
        username: Option<&str>,
        command: &str,
        error: &str,
    ) -> Self {
        Self {
            command: Some(command.to_string()),
            error: Some(error.to_string()),
            ..Self::base("error", chat_id, user_id, username)
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.reason {
            event.reason = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }
        if let Some(s) = &event.error {
            event.error = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }

    /// Audit failures never abort a request; they are only logged.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write(event) {
            tracing::warn!(path = %self.path.display(), "audit write failed: {e}");
        }
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}
