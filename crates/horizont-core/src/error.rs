use thiserror::Error;

use crate::types::ChatId;

/// Top-level error type for the Horizont workspace.
///
/// Store operations report `Storage` for any aborted transaction or
/// unavailable database and `ChatNotFound` for unknown chat ids. Higher
/// layers convert these with `From` so `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HorizontError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Chat not found: {0}")]
    ChatNotFound(ChatId),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for HorizontError {
    fn from(err: toml::de::Error) -> Self {
        HorizontError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for HorizontError {
    fn from(err: toml::ser::Error) -> Self {
        HorizontError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for HorizontError {
    fn from(err: serde_json::Error) -> Self {
        HorizontError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Horizont operations.
pub type Result<T> = std::result::Result<T, HorizontError>;
