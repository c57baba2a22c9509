use crate::models::{RepeatMode, Track};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Transport state of the active session. End-of-track is resolved
/// synchronously by the engine and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Idle,
    Loading,
    Playing,
    Paused,
}

/// The single active playback session, one per user per run. Created on the
/// first `play_track`, flushed and dropped on stop, shutdown or user switch.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub state: PlayerState,
    volume: f32,
    pub muted: bool,
    speed: f32,
    crossfade_secs: f64,
    pub repeat: RepeatMode,
    pub shuffle: bool,
    pub elapsed: f64,
    pub duration: f64,
    pub started_at: DateTime<Utc>,
    /// Wall-clock seconds actually listened to the current track, reset on
    /// every track change when flushed to telemetry.
    pub listened_secs: f64,
}

impl PlaybackSession {
    pub fn new(user_id: Option<String>, crossfade_secs: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            state: PlayerState::Idle,
            volume: 1.0,
            muted: false,
            speed: 1.0,
            crossfade_secs: crossfade_secs.max(0.0),
            repeat: RepeatMode::None,
            shuffle: false,
            elapsed: 0.0,
            duration: 0.0,
            started_at: Utc::now(),
            listened_secs: 0.0,
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, v: f32) {
        self.volume = v.clamp(0.0, 1.0);
    }

    /// Volume after the mute flag, what the host audio layer should apply.
    pub fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn set_speed(&mut self, s: f32) {
        self.speed = s.clamp(0.5, 2.0);
    }

    pub fn crossfade_secs(&self) -> f64 {
        self.crossfade_secs
    }

    pub fn set_crossfade_secs(&mut self, secs: f64) {
        self.crossfade_secs = secs.max(0.0);
    }

    pub fn seek(&mut self, t: f64) {
        self.elapsed = t.clamp(0.0, self.duration);
    }

    /// Reset position tracking for a newly current track.
    pub fn begin_track(&mut self, duration_secs: u64) {
        self.elapsed = 0.0;
        self.duration = duration_secs as f64;
        self.listened_secs = 0.0;
    }

    pub fn remaining(&self) -> f64 {
        (self.duration - self.elapsed).max(0.0)
    }

    pub fn completion_percentage(&self) -> f32 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        ((self.elapsed / self.duration * 100.0) as f32).clamp(0.0, 100.0)
    }

    /// Linear crossfade gains `(outgoing, incoming)` while inside the fade
    /// window, `None` outside it or with crossfade disabled.
    pub fn crossfade_gains(&self) -> Option<(f32, f32)> {
        if self.crossfade_secs <= 0.0 || self.duration <= 0.0 {
            return None;
        }
        let remaining = self.remaining();
        if remaining > self.crossfade_secs {
            return None;
        }
        let out = (remaining / self.crossfade_secs) as f32;
        Some((out, 1.0 - out))
    }
}

/// Point-in-time view of the engine, answered over the command channel so
/// it reflects every command sent before it.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: PlayerState,
    pub session_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub current_track: Option<Track>,
    pub queue: Vec<Track>,
    pub current_index: usize,
    pub elapsed: f64,
    pub duration: f64,
    pub volume: f32,
    pub muted: bool,
    pub speed: f32,
    pub repeat: RepeatMode,
    pub shuffle: bool,
    pub crossfade_secs: f64,
    pub crossfade_primed: bool,
    pub crossfade_gains: Option<(f32, f32)>,
}
