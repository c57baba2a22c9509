//! Typed errors for the recommendation system.

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during recommendation generation.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum RecommendError {
    /// A provider query failed (category browse, search)
    #[error("Provider error: {0}")]
    Provider(String),

    /// The listening-history read failed
    #[error("History error: {0}")]
    History(String),

    /// No listening history available to seed a history-driven strategy
    #[error("No listening history available for recommendations")]
    NoListeningHistory,

    /// Internal/unexpected error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for RecommendError {
    fn from(e: anyhow::Error) -> Self {
        RecommendError::Provider(e.to_string())
    }
}
