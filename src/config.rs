use serde::Deserialize;

/// Engine-wide configuration, constructed at application start and injected
/// into [`Player::new`](crate::Player::new). No ambient globals.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Device label attached to telemetry records.
    pub device_name: String,
    /// When the queue runs out, pull one blended recommendation and keep going.
    pub autoplay: bool,
    /// Crossfade window in seconds applied to new sessions. 0 disables it.
    pub default_crossfade_secs: f64,
    /// Result cache time-to-live in seconds.
    pub cache_ttl_secs: u64,
    /// Result cache capacity in entries.
    pub cache_capacity: usize,
    /// How many history rows strategies read.
    pub history_limit: usize,
    /// How far back (days) the history query reaches.
    pub history_days: u32,
    /// Default size of a blended recommendation list.
    pub recommendation_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_name: "unknown".to_string(),
            autoplay: true,
            default_crossfade_secs: 0.0,
            cache_ttl_secs: 300,
            cache_capacity: 1000,
            history_limit: 50,
            history_days: 30,
            recommendation_limit: 20,
        }
    }
}
