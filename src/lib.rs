//! Resona: a personalized playback and recommendation engine.
//!
//! The crate is built around three pieces:
//!
//! - [`playback`]: a single-session playback engine driven through an
//!   ordered command channel, with queue management, repeat/shuffle,
//!   crossfade priming and autoplay continuation.
//! - [`recommendations`]: a blender that fans out five scoring strategies
//!   against a metadata provider and merges them into one ranked list.
//! - [`cache`]: a TTL + capacity bounded result cache shared by both.
//!
//! Metadata and persistence are abstracted behind the traits in
//! [`providers`]; the engine never talks to a concrete backend.

pub mod cache;
pub mod config;
pub mod errors;
pub mod models;
pub mod playback;
pub mod providers;
pub mod recommendations;

pub use cache::{CacheStats, ResultCache};
pub use config::EngineConfig;
pub use errors::PlaybackError;
pub use models::{
    Category, HistoryQuery, ListenEvent, ListeningRecord, RepeatMode, SearchFilters, StreamInfo,
    Track,
};
pub use playback::{Player, PlayerEvent, PlayerHandle, PlayerState, SessionSnapshot};
pub use providers::{MetadataProvider, PersistenceGateway};
pub use recommendations::{
    DiscoveryFeed, RecommendError, RecommendOptions, Recommendation, RecommendationBlender,
    Strategy,
};
