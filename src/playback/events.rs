use crate::models::Track;
use crate::playback::session::PlayerState;
use serde::Serialize;

/// Events fanned out to subscribers (UI layer, OS integrations).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum PlayerEvent {
    StateChanged(PlayerState),
    TrackChanged(Track),
    TrackEnded,
    QueueChanged,
    PositionChanged(f64),
    /// The next track's stream is primed and the crossfade window is armed.
    CrossfadePrimed(Track),
    PlaybackError {
        code: String,
        message: String,
    },
}
