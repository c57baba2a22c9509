//! Data types for the recommendation system.

use crate::models::Track;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One independent recommendation-generation algorithm. The declaration
/// order here is the fixed merge order: earlier strategies win ties when
/// the same track surfaces more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Trending-content proxy standing in for collaborative filtering.
    Collaborative,
    /// Genre-affinity driven, seeded by listening history.
    ContentBased,
    Trending,
    NewRelease,
    MoodBased,
}

/// A scored candidate produced by one strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub track: Track,
    pub strategy: Strategy,
    /// Strategy-local confidence; comparable across strategies because all
    /// of them share the same base/decay conventions.
    pub confidence: f64,
    pub generated_at: DateTime<Utc>,
}

/// Per-call knobs for [`RecommendationBlender::generate`](super::RecommendationBlender::generate).
#[derive(Debug, Clone)]
pub struct RecommendOptions {
    pub limit: usize,
    /// Track identities never to return (e.g., everything already queued).
    pub exclude_ids: Vec<String>,
}

impl Default for RecommendOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            exclude_ids: Vec::new(),
        }
    }
}

/// Bucketed discovery feed: results partitioned by category instead of
/// merged into one ranked list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryFeed {
    pub trending: Vec<Track>,
    pub new_releases: Vec<Track>,
    pub recommended: Vec<Track>,
    pub genres: Vec<Track>,
    pub similar_artists: Vec<Track>,
}
