/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type so the dispatch
/// layer can handle failures consistently. Admission rejections are not errors;
/// see [`crate::gate::Rejection`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("storage unavailable: {0}")]
    Storage(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid access grant: {0}")]
    InvalidGrant(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
