use thiserror::Error;

/// Errors from config loading and message encoding.
#[derive(Debug, Error)]
pub enum EchoLensError {
    #[error("Config error: {0}")]
    Config(String),

    /// An outbound message could not be serialized.
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EchoLensError>;
