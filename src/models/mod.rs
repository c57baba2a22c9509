use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A playable track as returned by a metadata provider.
///
/// Identity is the provider-native `external_id`: two tracks carrying the
/// same external id are interchangeable regardless of any other field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    /// Provider-native identifier. This is the identity of the track.
    pub external_id: String,
    pub title: String,
    pub artist: String,
    /// Duration in seconds.
    pub duration: u64,
    pub genre: Option<String>,
    #[serde(rename = "cover_image")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub explicit: bool,
}

impl Track {
    /// The identity used for deduplication, exclusion and queue membership.
    pub fn identity(&self) -> &str {
        &self.external_id
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.external_id == other.external_id
    }
}

impl Eq for Track {}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    None,
    One,
    All,
}

/// Provider categories for browse-style queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Trending,
    New,
    Top,
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::Trending => "trending",
            Category::New => "new",
            Category::Top => "top",
        }
    }
}

/// Optional narrowing filters for provider search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub genre: Option<String>,
}

/// Resolved stream information for a track, ready for the host audio layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub url: String,
    /// Codec information if available (e.g., "flac", "mp3")
    pub codec: Option<String>,
}

/// One row of a user's listening history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListeningRecord {
    pub track_id: String,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub duration_listened_secs: u64,
    pub completion_percentage: f32,
    pub played_at: DateTime<Utc>,
    pub context: Option<String>,
}

/// Telemetry payload flushed to the persistence gateway on track change
/// and session end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenEvent {
    pub track_id: String,
    pub duration_listened_secs: u64,
    pub completion_percentage: f32,
    pub device: String,
    pub context: Option<String>,
}

/// Bounds for a listening-history query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub limit: usize,
    pub days: u32,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self { limit: 50, days: 30 }
    }
}
