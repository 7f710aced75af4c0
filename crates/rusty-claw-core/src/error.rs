use thiserror::Error;

#[derive(Debug, Error)]
pub enum RustyClawError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Audio driver error: {0}")]
    Audio(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("VAD error: {0}")]
    Vad(String),

    #[error("Session protocol error: {0}")]
    Protocol(String),

    #[error("Request signing error: {0}")]
    Signing(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Auth error: {0}")]
    Auth(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RustyClawError>;
