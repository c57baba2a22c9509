use crate::models::{RepeatMode, Track};
use crate::playback::session::SessionSnapshot;
use tokio::sync::oneshot;

/// The single ordered intake of the playback engine. A command is fully
/// applied before the next one is looked at; only stream loads escape the
/// loop (spawned, generation-guarded).
#[derive(Debug)]
pub enum PlayerCommand {
    PlayTrack {
        track: Track,
        queue: Option<Vec<Track>>,
        start_index: Option<usize>,
        user_id: Option<String>,
    },
    Play,
    Pause,
    TogglePlayPause,
    Next,
    Previous,
    Seek(f64),
    SkipForward(f64),
    SkipBackward(f64),
    SetVolume(f32),
    ToggleMute,
    SetSpeed(f32),
    SetCrossfade(f64),
    ToggleShuffle,
    SetRepeatMode(RepeatMode),
    AddToQueue(Track),
    AddNextToQueue(Track),
    RemoveFromQueue(usize),
    MoveQueueItem { from: usize, to: usize },
    ClearQueue,
    /// Playback clock advanced by the host audio layer.
    Tick(f64),
    Stop,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}
