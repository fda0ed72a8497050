use thiserror::Error;

/// Top-level error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Startup-time configuration problem — missing env var, unreadable store dir.
    #[error("config error: {0}")]
    Config(String),

    /// Persistence failure — schema bootstrap or a per-request store operation.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Failure talking to the WhatsApp protocol client (send/upload/download/pair).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Media decode/encode failure (e.g. malformed Ogg/Opus container).
    #[error("media error: {0}")]
    Media(String),

    /// Speech-to-text subprocess failure — missing binary/model, bad exit, timeout.
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Missing or malformed request fields.
    #[error("validation error: {0}")]
    Validation(String),

    /// Bad or missing API key.
    #[error("unauthorized")]
    Auth,

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for BridgeError {
    fn from(e: sqlx::Error) -> Self {
        BridgeError::Persistence(e.to_string())
    }
}
