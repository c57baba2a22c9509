//! Recommendation blending for music discovery.
//!
//! Fans out to five independent scoring strategies against the metadata
//! provider, then merges, deduplicates and ranks the candidates into one
//! list. Also builds the bucketed discovery feed variant.

pub mod blender;
pub mod errors;
pub mod types;

pub use blender::RecommendationBlender;
pub use errors::RecommendError;
pub use types::{DiscoveryFeed, Recommendation, RecommendOptions, Strategy};
