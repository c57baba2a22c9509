use crate::models::{
    Category, HistoryQuery, ListenEvent, ListeningRecord, SearchFilters, StreamInfo, Track,
};
use anyhow::Result;
use async_trait::async_trait;

/// A source of track metadata and streams (e.g., "tidal", "subsonic").
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Unique identifier (e.g., "tidal", "subsonic", "jellyfin")
    fn id(&self) -> &str;

    /// Free-text search, optionally narrowed by filters.
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        max_results: usize,
    ) -> Result<Vec<Track>>;

    /// Browse a provider category (trending, new releases, top).
    async fn get_by_category(&self, category: Category, max_results: usize) -> Result<Vec<Track>>;

    /// Resolve a playable stream for a track.
    async fn get_stream_url(&self, external_id: &str) -> Result<StreamInfo>;
}

/// The managed backing store: listening telemetry, favorites, history.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Record one completed (or abandoned) listen. Best-effort from the
    /// engine's point of view; failures are logged and swallowed upstream.
    async fn record_listen(&self, user_id: &str, event: ListenEvent) -> Result<()>;

    async fn get_favorites(&self, user_id: &str) -> Result<Vec<String>>;
    async fn add_favorite(&self, user_id: &str, track_id: &str) -> Result<()>;
    async fn remove_favorite(&self, user_id: &str, track_id: &str) -> Result<()>;

    async fn get_listening_history(
        &self,
        user_id: &str,
        query: HistoryQuery,
    ) -> Result<Vec<ListeningRecord>>;
}
