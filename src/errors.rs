use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum PlaybackError {
    #[error("Stream load failed: {0}")]
    StreamLoad(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Engine unavailable: {0}")]
    ChannelClosed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for PlaybackError {
    fn from(e: anyhow::Error) -> Self {
        PlaybackError::Provider(e.to_string())
    }
}

impl From<serde_json::Error> for PlaybackError {
    fn from(e: serde_json::Error) -> Self {
        PlaybackError::Internal(format!("Serialization error: {}", e))
    }
}
