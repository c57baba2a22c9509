//! Playback engine and its public facade.
//!
//! All session state lives in [`PlayerCore`], owned by one task and mutated
//! only through the ordered command intake. Stream loads and crossfade
//! primes are the only work that escapes the loop: they run on a `JoinSet`
//! tagged with a generation, and a completion whose generation is no longer
//! current is discarded (the stale-load guard).

use crate::cache::{CacheStats, ResultCache};
use crate::config::EngineConfig;
use crate::errors::PlaybackError;
use crate::models::{ListenEvent, RepeatMode, StreamInfo, Track};
use crate::playback::commands::PlayerCommand;
use crate::playback::events::PlayerEvent;
use crate::playback::queue::TrackQueue;
use crate::playback::session::{PlaybackSession, PlayerState, SessionSnapshot};
use crate::providers::{MetadataProvider, PersistenceGateway};
use crate::recommendations::{
    DiscoveryFeed, RecommendOptions, RecommendError, Recommendation, RecommendationBlender,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;

/// Restarting instead of stepping back: how far into a track `previous()`
/// means "from the top".
const PREVIOUS_RESTART_THRESHOLD_SECS: f64 = 5.0;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadKind {
    /// Load for the track that should start playing as soon as it is ready.
    Immediate,
    /// Crossfade prime for the upcoming track; must not touch the queue.
    Prime,
}

/// Handed out by the core when a stream needs resolving; the completion is
/// only applied if the generation still matches.
#[derive(Debug, Clone)]
struct LoadTicket {
    generation: u64,
    kind: LoadKind,
    track: Track,
}

struct PrimedStream {
    track: Track,
    stream: StreamInfo,
}

/// What the command loop must do after the core resolved end-of-track.
enum AfterEnd {
    /// Fully resolved inside the core (restart, primed handover, stop).
    None,
    /// Resolve this stream, then `complete_load`.
    Load(LoadTicket),
    /// Pull one blended recommendation and continue with it.
    Autoplay,
}

#[derive(Default)]
struct TickActions {
    prime: Option<LoadTicket>,
    after_end: Option<AfterEnd>,
}

struct LoadOutcome {
    ticket: LoadTicket,
    result: anyhow::Result<StreamInfo>,
}

/// Owned state of the single active session. Never shared: the engine task
/// is the only holder, so no field needs a lock.
struct PlayerCore {
    config: EngineConfig,
    gateway: Arc<dyn PersistenceGateway>,
    events: broadcast::Sender<PlayerEvent>,
    session: Option<PlaybackSession>,
    queue: TrackQueue,
    current_stream: Option<StreamInfo>,
    load_generation: u64,
    prime_generation: u64,
    prime_requested: bool,
    primed: Option<PrimedStream>,
}

impl PlayerCore {
    fn new(
        config: EngineConfig,
        gateway: Arc<dyn PersistenceGateway>,
        events: broadcast::Sender<PlayerEvent>,
    ) -> Self {
        Self {
            config,
            gateway,
            events,
            session: None,
            queue: TrackQueue::new(),
            current_stream: None,
            load_generation: 0,
            prime_generation: 0,
            prime_requested: false,
            primed: None,
        }
    }

    fn emit(&self, event: PlayerEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn state(&self) -> PlayerState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(PlayerState::Idle)
    }

    // --- session & loading -------------------------------------------------

    fn play_track(
        &mut self,
        track: Track,
        queue: Option<Vec<Track>>,
        start_index: Option<usize>,
        user_id: Option<String>,
    ) -> LoadTicket {
        self.flush_listen("interrupted");

        // A different user takes over: flush belongs to the old session.
        let user_switch = matches!(
            (&self.session, &user_id),
            (Some(s), Some(u)) if s.user_id.as_deref() != Some(u.as_str())
                && s.user_id.is_some()
        );
        if user_switch {
            log::info!("User switch, dropping previous session");
            self.session = None;
        }

        let session = self.session.get_or_insert_with(|| {
            PlaybackSession::new(user_id.clone(), self.config.default_crossfade_secs)
        });
        if user_id.is_some() {
            session.user_id = user_id;
        }

        match queue {
            Some(tracks) => {
                let start = start_index
                    .or_else(|| tracks.iter().position(|t| t == &track))
                    .unwrap_or(0);
                self.queue.set_tracks(tracks, start);
            }
            None => self.queue.set_tracks(vec![track.clone()], 0),
        }
        self.emit(PlayerEvent::QueueChanged);

        let current = self.queue.current().cloned().unwrap_or(track);
        self.begin_load(current)
    }

    /// Move the session into Loading for `track` and issue a fresh ticket.
    /// Any outstanding load or prime is superseded from this point on.
    fn begin_load(&mut self, track: Track) -> LoadTicket {
        self.cancel_prime();
        self.load_generation += 1;
        self.current_stream = None;

        if let Some(session) = &mut self.session {
            session.state = PlayerState::Loading;
            session.begin_track(track.duration);
        }

        self.emit(PlayerEvent::TrackChanged(track.clone()));
        self.emit(PlayerEvent::StateChanged(PlayerState::Loading));

        LoadTicket {
            generation: self.load_generation,
            kind: LoadKind::Immediate,
            track,
        }
    }

    fn complete_load(&mut self, ticket: &LoadTicket, result: anyhow::Result<StreamInfo>) {
        if ticket.generation != self.load_generation {
            log::debug!(
                "Discarding superseded load for '{}' (gen {} != {})",
                ticket.track.title,
                ticket.generation,
                self.load_generation
            );
            return;
        }
        let Some(session) = &mut self.session else {
            return;
        };

        match result {
            Ok(stream) => {
                self.current_stream = Some(stream);
                session.state = PlayerState::Playing;
                self.emit(PlayerEvent::StateChanged(PlayerState::Playing));
            }
            Err(e) => {
                log::warn!("Stream load failed for '{}': {}", ticket.track.title, e);
                session.state = PlayerState::Paused;
                self.emit(PlayerEvent::PlaybackError {
                    code: "STREAM_LOAD".to_string(),
                    message: e.to_string(),
                });
                self.emit(PlayerEvent::StateChanged(PlayerState::Paused));
            }
        }
    }

    // --- crossfade ---------------------------------------------------------

    /// Which queue slot a crossfade would hand over to, if any. Never
    /// mutates the index; repeat-one restarts in place and the autoplay
    /// continuation is not known ahead of time.
    fn prime_target(&self) -> Option<usize> {
        let session = self.session.as_ref()?;
        match session.repeat {
            RepeatMode::One => None,
            _ if self.queue.has_next() => Some(self.queue.current_index() + 1),
            RepeatMode::All if self.queue.len() > 1 => Some(0),
            _ => None,
        }
    }

    fn complete_prime(&mut self, ticket: &LoadTicket, result: anyhow::Result<StreamInfo>) {
        if ticket.generation != self.prime_generation || !self.prime_requested {
            log::debug!("Discarding canceled prime for '{}'", ticket.track.title);
            return;
        }
        match result {
            Ok(stream) => {
                self.emit(PlayerEvent::CrossfadePrimed(ticket.track.clone()));
                self.primed = Some(PrimedStream {
                    track: ticket.track.clone(),
                    stream,
                });
            }
            Err(e) => {
                log::warn!("Crossfade prime failed for '{}': {}", ticket.track.title, e);
                self.prime_requested = false;
            }
        }
    }

    fn cancel_prime(&mut self) {
        self.prime_generation += 1;
        self.prime_requested = false;
        self.primed = None;
    }

    /// Supersede any outstanding load without issuing a new ticket. Must be
    /// called whenever the engine walks away from the loading track, or a
    /// late completion would resurrect it.
    fn cancel_load(&mut self) {
        self.load_generation += 1;
    }

    // --- clock -------------------------------------------------------------

    fn tick(&mut self, delta_secs: f64) -> TickActions {
        let mut actions = TickActions::default();
        let Some(session) = &mut self.session else {
            return actions;
        };
        if session.state != PlayerState::Playing || delta_secs <= 0.0 {
            return actions;
        }

        session.elapsed =
            (session.elapsed + delta_secs * session.speed() as f64).min(session.duration);
        session.listened_secs += delta_secs;
        let elapsed = session.elapsed;
        let duration = session.duration;
        let crossfade = session.crossfade_secs();
        let remaining = session.remaining();
        self.emit(PlayerEvent::PositionChanged(elapsed));

        if crossfade > 0.0
            && remaining > 0.0
            && remaining <= crossfade
            && !self.prime_requested
            && self.primed.is_none()
        {
            if let Some(target) = self.prime_target() {
                let track = self.queue.tracks()[target].clone();
                self.prime_generation += 1;
                self.prime_requested = true;
                log::debug!("Priming crossfade into '{}'", track.title);
                actions.prime = Some(LoadTicket {
                    generation: self.prime_generation,
                    kind: LoadKind::Prime,
                    track,
                });
            }
        }

        if duration > 0.0 && elapsed >= duration {
            actions.after_end = Some(self.handle_track_end());
        }
        actions
    }

    /// End-of-track policy, applied in order: repeat-one restart, queue
    /// advance, repeat-all wrap, autoplay continuation, stop Paused.
    fn handle_track_end(&mut self) -> AfterEnd {
        self.flush_listen("completed");
        self.emit(PlayerEvent::TrackEnded);

        let Some(session) = &mut self.session else {
            return AfterEnd::None;
        };

        if session.repeat == RepeatMode::One {
            session.elapsed = 0.0;
            self.emit(PlayerEvent::PositionChanged(0.0));
            return AfterEnd::None;
        }

        let repeat = session.repeat;
        if self.queue.advance().is_some() {
            return self.start_current_track();
        }
        if repeat == RepeatMode::All && self.queue.wrap_to_start().is_some() {
            return self.start_current_track();
        }
        if self.config.autoplay && session.user_id.is_some() {
            return AfterEnd::Autoplay;
        }

        session.state = PlayerState::Paused;
        session.elapsed = 0.0;
        self.cancel_prime();
        self.emit(PlayerEvent::StateChanged(PlayerState::Paused));
        AfterEnd::None
    }

    /// Start whatever the queue now points at, reusing a matching primed
    /// stream so a crossfade handover never reloads.
    fn start_current_track(&mut self) -> AfterEnd {
        let Some(track) = self.queue.current().cloned() else {
            return AfterEnd::None;
        };

        if let Some(primed) = self.primed.take() {
            if primed.track == track {
                self.prime_requested = false;
                // Outstanding immediate loads are superseded by the handover.
                self.load_generation += 1;
                self.current_stream = Some(primed.stream);
                if let Some(session) = &mut self.session {
                    session.begin_track(track.duration);
                    session.state = PlayerState::Playing;
                }
                self.emit(PlayerEvent::TrackChanged(track));
                self.emit(PlayerEvent::StateChanged(PlayerState::Playing));
                return AfterEnd::None;
            }
            log::debug!("Primed stream no longer matches, reloading");
        }
        AfterEnd::Load(self.begin_load(track))
    }

    fn autoplay_append(&mut self, track: Track) -> LoadTicket {
        log::info!("Autoplay continuation: '{}' by {}", track.title, track.artist);
        self.queue.append(track.clone());
        self.queue.jump_to_last();
        self.emit(PlayerEvent::QueueChanged);
        let current = self.queue.current().cloned().unwrap_or(track);
        self.begin_load(current)
    }

    fn autoplay_unavailable(&mut self) {
        if let Some(session) = &mut self.session {
            session.state = PlayerState::Paused;
            session.elapsed = 0.0;
            self.emit(PlayerEvent::StateChanged(PlayerState::Paused));
        }
    }

    // --- transport ---------------------------------------------------------

    fn play(&mut self) {
        if self.state() == PlayerState::Paused && self.current_stream.is_some() {
            if let Some(session) = &mut self.session {
                session.state = PlayerState::Playing;
            }
            self.emit(PlayerEvent::StateChanged(PlayerState::Playing));
        }
    }

    fn pause(&mut self) {
        if self.state() == PlayerState::Playing {
            if let Some(session) = &mut self.session {
                session.state = PlayerState::Paused;
            }
            self.emit(PlayerEvent::StateChanged(PlayerState::Paused));
        }
    }

    fn toggle_play_pause(&mut self) {
        match self.state() {
            PlayerState::Playing => self.pause(),
            PlayerState::Paused => self.play(),
            PlayerState::Idle | PlayerState::Loading => {}
        }
    }

    fn next(&mut self) -> Option<LoadTicket> {
        self.session.as_ref()?;
        let repeat = self.session.as_ref().map(|s| s.repeat)?;

        let moved = if self.queue.has_next() {
            self.flush_listen("skipped");
            self.queue.advance().is_some()
        } else if repeat == RepeatMode::All && !self.queue.is_empty() {
            self.flush_listen("skipped");
            self.queue.wrap_to_start().is_some()
        } else {
            false
        };

        if moved {
            let track = self.queue.current().cloned()?;
            Some(self.begin_load(track))
        } else {
            None
        }
    }

    fn previous(&mut self) -> Option<LoadTicket> {
        self.session.as_ref()?;
        self.cancel_prime();

        let session = self.session.as_mut()?;
        if session.elapsed > PREVIOUS_RESTART_THRESHOLD_SECS {
            session.seek(0.0);
            self.emit(PlayerEvent::PositionChanged(0.0));
            return None;
        }

        if self.queue.current_index() == 0 {
            return None;
        }
        self.flush_listen("skipped-back");
        self.queue.step_back();
        let track = self.queue.current().cloned()?;
        Some(self.begin_load(track))
    }

    fn seek(&mut self, t: f64) {
        if self.queue.current().is_none() {
            return;
        }
        let Some(session) = &mut self.session else {
            return;
        };
        if !matches!(session.state, PlayerState::Playing | PlayerState::Paused) {
            return;
        }
        session.seek(t);
        let elapsed = session.elapsed;
        // A seek inside the fade window abandons the pending handover.
        self.cancel_prime();
        self.emit(PlayerEvent::PositionChanged(elapsed));
    }

    fn skip_forward(&mut self, secs: f64) {
        let elapsed = self.session.as_ref().map(|s| s.elapsed).unwrap_or(0.0);
        self.seek(elapsed + secs.max(0.0));
    }

    fn skip_backward(&mut self, secs: f64) {
        let elapsed = self.session.as_ref().map(|s| s.elapsed).unwrap_or(0.0);
        self.seek(elapsed - secs.max(0.0));
    }

    fn set_volume(&mut self, v: f32) {
        if let Some(session) = &mut self.session {
            session.set_volume(v);
        }
    }

    fn toggle_mute(&mut self) {
        if let Some(session) = &mut self.session {
            session.muted = !session.muted;
        }
    }

    fn set_speed(&mut self, s: f32) {
        if let Some(session) = &mut self.session {
            session.set_speed(s);
        }
    }

    fn set_crossfade(&mut self, secs: f64) {
        if let Some(session) = &mut self.session {
            session.set_crossfade_secs(secs);
            if secs <= 0.0 {
                self.cancel_prime();
            }
        }
    }

    fn toggle_shuffle(&mut self) {
        if let Some(session) = &mut self.session {
            session.shuffle = !session.shuffle;
            if session.shuffle {
                self.queue.shuffle_upcoming();
            }
            self.emit(PlayerEvent::QueueChanged);
        }
    }

    fn set_repeat_mode(&mut self, mode: RepeatMode) {
        if let Some(session) = &mut self.session {
            session.repeat = mode;
        }
    }

    // --- queue edits ---------------------------------------------------

    fn add_to_queue(&mut self, track: Track) {
        self.queue.append(track);
        self.emit(PlayerEvent::QueueChanged);
    }

    fn add_next_to_queue(&mut self, track: Track) {
        self.queue.insert_next(track);
        self.emit(PlayerEvent::QueueChanged);
    }

    fn remove_from_queue(&mut self, i: usize) -> Option<LoadTicket> {
        if i >= self.queue.len() {
            return None;
        }
        let was_current = i == self.queue.current_index();
        if was_current {
            self.flush_listen("removed");
        }
        self.queue.remove_at(i);
        self.emit(PlayerEvent::QueueChanged);

        if !was_current || self.session.is_none() {
            return None;
        }
        match self.queue.current().cloned() {
            // The next track was promoted into the current slot; play it.
            Some(track) => Some(self.begin_load(track)),
            None => {
                self.cancel_prime();
                self.cancel_load();
                self.current_stream = None;
                if let Some(session) = &mut self.session {
                    session.state = PlayerState::Idle;
                    session.elapsed = 0.0;
                    session.duration = 0.0;
                }
                self.emit(PlayerEvent::StateChanged(PlayerState::Idle));
                None
            }
        }
    }

    fn move_queue_item(&mut self, from: usize, to: usize) {
        self.queue.move_item(from, to);
        self.emit(PlayerEvent::QueueChanged);
    }

    fn clear_queue(&mut self) {
        self.flush_listen("cleared");
        self.queue.clear();
        self.cancel_prime();
        self.cancel_load();
        self.current_stream = None;
        if let Some(session) = &mut self.session {
            session.state = PlayerState::Idle;
            session.elapsed = 0.0;
            session.duration = 0.0;
        }
        self.emit(PlayerEvent::QueueChanged);
        self.emit(PlayerEvent::StateChanged(PlayerState::Idle));
    }

    fn stop(&mut self) {
        self.flush_listen("stopped");
        self.cancel_prime();
        self.cancel_load();
        self.current_stream = None;
        self.session = None;
        self.emit(PlayerEvent::StateChanged(PlayerState::Idle));
    }

    // --- telemetry -----------------------------------------------------

    /// Best-effort listen record for the outgoing track. Spawned so it can
    /// never block or fail playback; errors are logged and swallowed.
    fn flush_listen(&mut self, context: &str) {
        let Some(session) = &mut self.session else {
            return;
        };
        let Some(track) = self.queue.current() else {
            return;
        };
        if session.listened_secs <= 0.0 {
            return;
        }
        let Some(user_id) = session.user_id.clone() else {
            session.listened_secs = 0.0;
            return;
        };

        let event = ListenEvent {
            track_id: track.identity().to_string(),
            duration_listened_secs: session.listened_secs.round() as u64,
            completion_percentage: session.completion_percentage(),
            device: self.config.device_name.clone(),
            context: Some(context.to_string()),
        };
        session.listened_secs = 0.0;

        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            if let Err(e) = gateway.record_listen(&user_id, event).await {
                log::warn!("Telemetry flush failed for user {}: {}", user_id, e);
            }
        });
    }

    fn snapshot(&self) -> SessionSnapshot {
        let session = self.session.as_ref();
        SessionSnapshot {
            state: self.state(),
            session_id: session.map(|s| s.id),
            user_id: session.and_then(|s| s.user_id.clone()),
            current_track: self.queue.current().cloned(),
            queue: self.queue.tracks().to_vec(),
            current_index: self.queue.current_index(),
            elapsed: session.map(|s| s.elapsed).unwrap_or(0.0),
            duration: session.map(|s| s.duration).unwrap_or(0.0),
            volume: session.map(|s| s.volume()).unwrap_or(1.0),
            muted: session.map(|s| s.muted).unwrap_or(false),
            speed: session.map(|s| s.speed()).unwrap_or(1.0),
            repeat: session.map(|s| s.repeat).unwrap_or(RepeatMode::None),
            shuffle: session.map(|s| s.shuffle).unwrap_or(false),
            crossfade_secs: session.map(|s| s.crossfade_secs()).unwrap_or(0.0),
            crossfade_primed: self.primed.is_some(),
            crossfade_gains: if self.primed.is_some() {
                session.and_then(|s| s.crossfade_gains())
            } else {
                None
            },
        }
    }
}

/// Resolve a stream for a track, going through the shared result cache so
/// repeated plays of the same track skip the provider round-trip.
async fn resolve_stream(
    provider: Arc<dyn MetadataProvider>,
    cache: Arc<ResultCache>,
    track: &Track,
) -> anyhow::Result<StreamInfo> {
    let key = format!("stream:{}", track.identity());
    if let Some(stream) = cache.get::<StreamInfo>(&key) {
        log::debug!("Stream cache hit for '{}'", track.title);
        return Ok(stream);
    }
    let stream = provider.get_stream_url(track.identity()).await?;
    cache.set(&key, &stream);
    Ok(stream)
}

/// The engine task: drains the command channel and joins spawned loads.
struct PlaybackEngine {
    core: PlayerCore,
    rx: mpsc::UnboundedReceiver<PlayerCommand>,
    loads: JoinSet<LoadOutcome>,
    provider: Arc<dyn MetadataProvider>,
    cache: Arc<ResultCache>,
    blender: Arc<RecommendationBlender>,
}

impl PlaybackEngine {
    async fn run(mut self) {
        log::info!("Playback engine started");
        loop {
            tokio::select! {
                maybe_cmd = self.rx.recv() => {
                    match maybe_cmd {
                        None | Some(PlayerCommand::Shutdown) => {
                            self.core.stop();
                            break;
                        }
                        Some(cmd) => self.handle(cmd).await,
                    }
                }
                Some(joined) = self.loads.join_next(), if !self.loads.is_empty() => {
                    match joined {
                        Ok(outcome) => match outcome.ticket.kind {
                            LoadKind::Immediate => {
                                self.core.complete_load(&outcome.ticket, outcome.result)
                            }
                            LoadKind::Prime => {
                                self.core.complete_prime(&outcome.ticket, outcome.result)
                            }
                        },
                        Err(e) => log::warn!("Stream load task failed: {}", e),
                    }
                }
            }
        }
        log::info!("Playback engine stopped");
    }

    async fn handle(&mut self, cmd: PlayerCommand) {
        match cmd {
            PlayerCommand::PlayTrack {
                track,
                queue,
                start_index,
                user_id,
            } => {
                let ticket = self.core.play_track(track, queue, start_index, user_id);
                self.spawn_load(ticket);
            }
            PlayerCommand::Play => self.core.play(),
            PlayerCommand::Pause => self.core.pause(),
            PlayerCommand::TogglePlayPause => self.core.toggle_play_pause(),
            PlayerCommand::Next => {
                if let Some(ticket) = self.core.next() {
                    self.spawn_load(ticket);
                }
            }
            PlayerCommand::Previous => {
                if let Some(ticket) = self.core.previous() {
                    self.spawn_load(ticket);
                }
            }
            PlayerCommand::Seek(t) => self.core.seek(t),
            PlayerCommand::SkipForward(s) => self.core.skip_forward(s),
            PlayerCommand::SkipBackward(s) => self.core.skip_backward(s),
            PlayerCommand::SetVolume(v) => self.core.set_volume(v),
            PlayerCommand::ToggleMute => self.core.toggle_mute(),
            PlayerCommand::SetSpeed(s) => self.core.set_speed(s),
            PlayerCommand::SetCrossfade(secs) => self.core.set_crossfade(secs),
            PlayerCommand::ToggleShuffle => self.core.toggle_shuffle(),
            PlayerCommand::SetRepeatMode(mode) => self.core.set_repeat_mode(mode),
            PlayerCommand::AddToQueue(track) => self.core.add_to_queue(track),
            PlayerCommand::AddNextToQueue(track) => self.core.add_next_to_queue(track),
            PlayerCommand::RemoveFromQueue(i) => {
                if let Some(ticket) = self.core.remove_from_queue(i) {
                    self.spawn_load(ticket);
                }
            }
            PlayerCommand::MoveQueueItem { from, to } => self.core.move_queue_item(from, to),
            PlayerCommand::ClearQueue => self.core.clear_queue(),
            PlayerCommand::Tick(delta) => {
                let actions = self.core.tick(delta);
                if let Some(ticket) = actions.prime {
                    self.spawn_load(ticket);
                }
                if let Some(after_end) = actions.after_end {
                    self.resolve_after_end(after_end).await;
                }
            }
            PlayerCommand::Stop => self.core.stop(),
            PlayerCommand::Snapshot(reply) => {
                let _ = reply.send(self.core.snapshot());
            }
            PlayerCommand::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    async fn resolve_after_end(&mut self, after_end: AfterEnd) {
        match after_end {
            AfterEnd::None => {}
            AfterEnd::Load(ticket) => self.spawn_load(ticket),
            AfterEnd::Autoplay => {
                let Some(user_id) = self
                    .core
                    .session
                    .as_ref()
                    .and_then(|s| s.user_id.clone())
                else {
                    self.core.autoplay_unavailable();
                    return;
                };
                let opts = RecommendOptions {
                    limit: 1,
                    exclude_ids: self.core.queue.identities(),
                };
                match self.blender.generate(&user_id, opts).await {
                    Ok(recs) if !recs.is_empty() => {
                        if let Some(rec) = recs.into_iter().next() {
                            let ticket = self.core.autoplay_append(rec.track);
                            self.spawn_load(ticket);
                        }
                    }
                    Ok(_) => {
                        log::info!("Autoplay found nothing new, stopping");
                        self.core.autoplay_unavailable();
                    }
                    Err(e) => {
                        log::warn!("Autoplay recommendation failed: {}", e);
                        self.core.autoplay_unavailable();
                    }
                }
            }
        }
    }

    fn spawn_load(&mut self, ticket: LoadTicket) {
        let provider = self.provider.clone();
        let cache = self.cache.clone();
        self.loads.spawn(async move {
            let result = resolve_stream(provider, cache, &ticket.track).await;
            LoadOutcome { ticket, result }
        });
    }
}

/// Public facade of the engine. Cheap to clone; all playback methods post
/// onto the ordered command channel, recommendation/cache surfaces go to
/// the shared blender and cache directly.
#[derive(Clone)]
pub struct Player {
    tx: mpsc::UnboundedSender<PlayerCommand>,
    events: broadcast::Sender<PlayerEvent>,
    blender: Arc<RecommendationBlender>,
    cache: Arc<ResultCache>,
    gateway: Arc<dyn PersistenceGateway>,
}

/// Alias kept for call sites that hold many clones.
pub type PlayerHandle = Player;

impl Player {
    /// Build the shared cache and blender, spawn the engine task and hand
    /// back the facade. Must be called inside a tokio runtime.
    pub fn new(
        provider: Arc<dyn MetadataProvider>,
        gateway: Arc<dyn PersistenceGateway>,
        config: EngineConfig,
    ) -> Self {
        let cache = Arc::new(ResultCache::new(
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_capacity,
        ));
        let blender = Arc::new(RecommendationBlender::new(
            provider.clone(),
            gateway.clone(),
            cache.clone(),
            &config,
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let engine = PlaybackEngine {
            core: PlayerCore::new(config, gateway.clone(), events.clone()),
            rx,
            loads: JoinSet::new(),
            provider,
            cache: cache.clone(),
            blender: blender.clone(),
        };
        tokio::spawn(engine.run());

        Self {
            tx,
            events,
            blender,
            cache,
            gateway,
        }
    }

    fn send(&self, cmd: PlayerCommand) -> Result<(), PlaybackError> {
        self.tx
            .send(cmd)
            .map_err(|_| PlaybackError::ChannelClosed("playback engine is gone".to_string()))
    }

    /// Subscribe to engine events. Slow subscribers may observe lag.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    // --- transport surface ---------------------------------------------

    pub fn play_track(
        &self,
        track: Track,
        queue: Option<Vec<Track>>,
        start_index: Option<usize>,
        user_id: Option<String>,
    ) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::PlayTrack {
            track,
            queue,
            start_index,
            user_id,
        })
    }

    pub fn play(&self) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::Play)
    }

    pub fn pause(&self) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::Pause)
    }

    pub fn toggle_play_pause(&self) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::TogglePlayPause)
    }

    pub fn next(&self) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::Next)
    }

    pub fn previous(&self) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::Previous)
    }

    pub fn seek(&self, t: f64) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::Seek(t))
    }

    pub fn skip_forward(&self, secs: f64) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::SkipForward(secs))
    }

    pub fn skip_backward(&self, secs: f64) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::SkipBackward(secs))
    }

    pub fn set_volume(&self, v: f32) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::SetVolume(v))
    }

    pub fn toggle_mute(&self) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::ToggleMute)
    }

    pub fn set_speed(&self, s: f32) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::SetSpeed(s))
    }

    pub fn set_crossfade(&self, secs: f64) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::SetCrossfade(secs))
    }

    pub fn toggle_shuffle(&self) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::ToggleShuffle)
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::SetRepeatMode(mode))
    }

    // --- queue surface ---------------------------------------------------

    pub fn add_to_queue(&self, track: Track) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::AddToQueue(track))
    }

    pub fn add_next_to_queue(&self, track: Track) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::AddNextToQueue(track))
    }

    pub fn remove_from_queue(&self, i: usize) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::RemoveFromQueue(i))
    }

    pub fn move_queue_item(&self, from: usize, to: usize) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::MoveQueueItem { from, to })
    }

    pub fn clear_queue(&self) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::ClearQueue)
    }

    /// Advance the playback clock; the host audio layer calls this from its
    /// position callbacks.
    pub fn tick(&self, delta_secs: f64) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::Tick(delta_secs))
    }

    pub fn stop(&self) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::Stop)
    }

    pub fn shutdown(&self) -> Result<(), PlaybackError> {
        self.send(PlayerCommand::Shutdown)
    }

    /// Consistent point-in-time view, serialized behind every command sent
    /// before it on this handle.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, PlaybackError> {
        let (tx, rx) = oneshot::channel();
        self.send(PlayerCommand::Snapshot(tx))?;
        rx.await
            .map_err(|_| PlaybackError::ChannelClosed("playback engine is gone".to_string()))
    }

    // --- discovery surface -------------------------------------------------

    pub async fn get_personalized_recommendations(
        &self,
        user_id: &str,
        opts: RecommendOptions,
    ) -> Result<Vec<Track>, RecommendError> {
        let recs = self.blender.generate(user_id, opts).await?;
        Ok(recs.into_iter().map(|r| r.track).collect())
    }

    /// Full scored recommendations, for callers that want the strategy and
    /// confidence attached.
    pub async fn get_scored_recommendations(
        &self,
        user_id: &str,
        opts: RecommendOptions,
    ) -> Result<Vec<Recommendation>, RecommendError> {
        self.blender.generate(user_id, opts).await
    }

    pub async fn get_discovery_feed(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<DiscoveryFeed, RecommendError> {
        self.blender.discovery_feed(user_id, limit).await
    }

    // --- favorites surface ---------------------------------------------

    pub async fn get_favorites(&self, user_id: &str) -> Result<Vec<String>, PlaybackError> {
        self.gateway
            .get_favorites(user_id)
            .await
            .map_err(|e| PlaybackError::Persistence(e.to_string()))
    }

    /// Favorites shape what gets recommended, so both mutations drop the
    /// user's cached entries.
    pub async fn add_favorite(&self, user_id: &str, track_id: &str) -> Result<(), PlaybackError> {
        self.gateway
            .add_favorite(user_id, track_id)
            .await
            .map_err(|e| PlaybackError::Persistence(e.to_string()))?;
        self.cache.invalidate_for_user(user_id);
        Ok(())
    }

    pub async fn remove_favorite(
        &self,
        user_id: &str,
        track_id: &str,
    ) -> Result<(), PlaybackError> {
        self.gateway
            .remove_favorite(user_id, track_id)
            .await
            .map_err(|e| PlaybackError::Persistence(e.to_string()))?;
        self.cache.invalidate_for_user(user_id);
        Ok(())
    }

    // --- cache surface ---------------------------------------------------

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn invalidate_user_cache(&self, user_id: &str) {
        self.cache.invalidate_for_user(user_id);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoryQuery, ListeningRecord};
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct NullGateway;

    #[async_trait]
    impl PersistenceGateway for NullGateway {
        async fn record_listen(&self, _: &str, _: ListenEvent) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_favorites(&self, _: &str) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn add_favorite(&self, _: &str, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn remove_favorite(&self, _: &str, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_listening_history(
            &self,
            _: &str,
            _: HistoryQuery,
        ) -> anyhow::Result<Vec<ListeningRecord>> {
            Ok(Vec::new())
        }
    }

    fn track(id: &str, duration: u64) -> Track {
        Track {
            id: id.to_string(),
            external_id: id.to_string(),
            title: id.to_string(),
            artist: "artist".to_string(),
            duration,
            genre: None,
            thumbnail: None,
            explicit: false,
        }
    }

    fn stream(url: &str) -> StreamInfo {
        StreamInfo {
            url: url.to_string(),
            codec: None,
        }
    }

    fn core(config: EngineConfig) -> PlayerCore {
        let (events, _) = broadcast::channel(64);
        PlayerCore::new(config, Arc::new(NullGateway), events)
    }

    fn playing_core(tracks: Vec<Track>, index: usize) -> PlayerCore {
        let mut c = core(EngineConfig::default());
        let first = tracks[index].clone();
        let ticket = c.play_track(first, Some(tracks), Some(index), Some("u1".to_string()));
        c.complete_load(&ticket, Ok(stream("s")));
        assert_eq!(c.state(), PlayerState::Playing);
        c
    }

    #[tokio::test]
    async fn superseded_load_is_discarded() {
        let mut c = core(EngineConfig::default());
        let a = track("a", 100);
        let b = track("b", 100);

        let first = c.play_track(a, None, None, None);
        let second = c.play_track(b, None, None, None);

        // The stale completion must not flip the session to Playing.
        c.complete_load(&first, Ok(stream("a.mp3")));
        assert_eq!(c.state(), PlayerState::Loading);
        assert_eq!(c.queue.current().unwrap().identity(), "b");

        c.complete_load(&second, Ok(stream("b.mp3")));
        assert_eq!(c.state(), PlayerState::Playing);
        assert_eq!(c.queue.current().unwrap().identity(), "b");
    }

    #[tokio::test]
    async fn stale_load_cannot_resurrect_a_cleared_session() {
        let mut c = core(EngineConfig::default());
        let ticket = c.play_track(track("a", 100), None, None, None);

        // Clear while the stream is still loading.
        c.clear_queue();
        assert_eq!(c.state(), PlayerState::Idle);

        c.complete_load(&ticket, Ok(stream("a.mp3")));
        assert_eq!(c.state(), PlayerState::Idle);
        assert!(c.current_stream.is_none());
        assert!(c.queue.is_empty());
    }

    #[tokio::test]
    async fn stale_load_after_removing_the_only_track_is_discarded() {
        let mut c = core(EngineConfig::default());
        let ticket = c.play_track(track("a", 100), None, None, None);

        assert!(c.remove_from_queue(0).is_none());
        assert_eq!(c.state(), PlayerState::Idle);

        c.complete_load(&ticket, Ok(stream("a.mp3")));
        assert_eq!(c.state(), PlayerState::Idle);
        assert!(c.current_stream.is_none());
    }

    #[tokio::test]
    async fn stale_load_after_stop_is_discarded() {
        let mut c = core(EngineConfig::default());
        let ticket = c.play_track(track("a", 100), None, None, None);

        c.stop();
        let replay = c.play_track(track("b", 100), None, None, None);
        c.complete_load(&ticket, Ok(stream("a.mp3")));
        assert_eq!(c.state(), PlayerState::Loading);
        assert_eq!(c.queue.current().unwrap().identity(), "b");

        c.complete_load(&replay, Ok(stream("b.mp3")));
        assert_eq!(c.state(), PlayerState::Playing);
    }

    #[tokio::test]
    async fn failed_load_pauses_instead_of_crashing() {
        let mut c = core(EngineConfig::default());
        let ticket = c.play_track(track("a", 100), None, None, None);
        c.complete_load(&ticket, Err(anyhow!("404")));
        assert_eq!(c.state(), PlayerState::Paused);
    }

    #[tokio::test]
    async fn repeat_one_restarts_in_place() {
        let mut c = playing_core(vec![track("a", 100)], 0);
        c.set_repeat_mode(RepeatMode::One);

        let actions = c.tick(100.0);
        assert!(matches!(actions.after_end, Some(AfterEnd::None)));
        assert_eq!(c.state(), PlayerState::Playing);
        assert_eq!(c.session.as_ref().unwrap().elapsed, 0.0);
        assert_eq!(c.queue.current_index(), 0);
    }

    #[tokio::test]
    async fn last_track_without_autoplay_parks_paused() {
        let mut config = EngineConfig::default();
        config.autoplay = false;
        let mut c = core(config);
        let tracks = vec![track("a", 100), track("b", 100)];
        let ticket = c.play_track(tracks[1].clone(), Some(tracks), Some(1), Some("u1".into()));
        c.complete_load(&ticket, Ok(stream("s")));

        let actions = c.tick(100.0);
        assert!(matches!(actions.after_end, Some(AfterEnd::None)));
        assert_eq!(c.state(), PlayerState::Paused);
        assert_eq!(c.session.as_ref().unwrap().elapsed, 0.0);
        assert_eq!(c.queue.len(), 2);
        assert_eq!(c.queue.current_index(), 1);
    }

    #[tokio::test]
    async fn exhausted_queue_with_autoplay_asks_for_continuation() {
        let mut c = playing_core(vec![track("a", 100)], 0);
        let actions = c.tick(100.0);
        assert!(matches!(actions.after_end, Some(AfterEnd::Autoplay)));
    }

    #[tokio::test]
    async fn natural_end_advances_the_queue() {
        let mut c = playing_core(vec![track("a", 100), track("b", 90)], 0);
        let actions = c.tick(100.0);
        match actions.after_end {
            Some(AfterEnd::Load(ticket)) => assert_eq!(ticket.track.identity(), "b"),
            _ => panic!("expected a load for the next track"),
        }
        assert_eq!(c.queue.current_index(), 1);
        assert_eq!(c.state(), PlayerState::Loading);
    }

    #[tokio::test]
    async fn repeat_all_wraps_to_the_head() {
        let mut c = playing_core(vec![track("a", 100), track("b", 100)], 1);
        c.set_repeat_mode(RepeatMode::All);
        let actions = c.tick(100.0);
        match actions.after_end {
            Some(AfterEnd::Load(ticket)) => assert_eq!(ticket.track.identity(), "a"),
            _ => panic!("expected a wrap-around load"),
        }
        assert_eq!(c.queue.current_index(), 0);
    }

    #[tokio::test]
    async fn crossfade_primes_then_hands_over_without_reload() {
        let mut c = playing_core(vec![track("a", 100), track("b", 90)], 0);
        c.set_crossfade(10.0);

        let actions = c.tick(92.0);
        let prime = actions.prime.expect("prime inside the fade window");
        assert_eq!(prime.track.identity(), "b");
        // Priming never moves the index.
        assert_eq!(c.queue.current_index(), 0);

        c.complete_prime(&prime, Ok(stream("b.mp3")));
        assert!(c.primed.is_some());

        let actions = c.tick(8.0);
        assert!(matches!(actions.after_end, Some(AfterEnd::None)));
        assert_eq!(c.state(), PlayerState::Playing);
        assert_eq!(c.queue.current_index(), 1);
        assert_eq!(c.queue.current().unwrap().identity(), "b");
        assert_eq!(c.current_stream.as_ref().unwrap().url, "b.mp3");
    }

    #[tokio::test]
    async fn seek_during_fade_window_cancels_the_prime() {
        let mut c = playing_core(vec![track("a", 100), track("b", 90)], 0);
        c.set_crossfade(10.0);

        let actions = c.tick(95.0);
        let prime = actions.prime.unwrap();
        c.complete_prime(&prime, Ok(stream("b.mp3")));
        assert!(c.primed.is_some());

        c.seek(30.0);
        assert!(c.primed.is_none());

        // A stale prime completion after the cancel is ignored.
        c.complete_prime(&prime, Ok(stream("b.mp3")));
        assert!(c.primed.is_none());
    }

    #[tokio::test]
    async fn previous_restarts_late_and_steps_back_early() {
        let mut c = playing_core(vec![track("a", 100), track("b", 100)], 1);

        c.tick(30.0);
        assert!(c.previous().is_none());
        assert_eq!(c.session.as_ref().unwrap().elapsed, 0.0);
        assert_eq!(c.queue.current_index(), 1);

        c.tick(2.0);
        let ticket = c.previous().expect("early previous steps back");
        assert_eq!(ticket.track.identity(), "a");
        assert_eq!(c.queue.current_index(), 0);
    }

    #[tokio::test]
    async fn previous_at_queue_head_is_a_noop() {
        let mut c = playing_core(vec![track("a", 100)], 0);
        c.tick(2.0);
        assert!(c.previous().is_none());
        assert_eq!(c.queue.current_index(), 0);
    }

    #[tokio::test]
    async fn removing_the_playing_track_loads_the_promoted_one() {
        let mut c = playing_core(vec![track("a", 100), track("b", 100)], 0);
        let ticket = c.remove_from_queue(0).expect("promoted track should load");
        assert_eq!(ticket.track.identity(), "b");
        assert_eq!(c.queue.current_index(), 0);
    }

    #[tokio::test]
    async fn removing_the_only_track_goes_idle() {
        let mut c = playing_core(vec![track("a", 100)], 0);
        assert!(c.remove_from_queue(0).is_none());
        assert_eq!(c.state(), PlayerState::Idle);
        assert!(c.queue.is_empty());
    }

    #[tokio::test]
    async fn seek_is_a_noop_without_a_track() {
        let mut c = core(EngineConfig::default());
        c.seek(10.0); // nothing to do, must not panic
        assert_eq!(c.state(), PlayerState::Idle);
    }

    #[tokio::test]
    async fn speed_scales_elapsed_but_not_listened_time() {
        let mut c = playing_core(vec![track("a", 100)], 0);
        c.set_speed(2.0);
        c.tick(10.0);
        let session = c.session.as_ref().unwrap();
        assert_eq!(session.elapsed, 20.0);
        assert_eq!(session.listened_secs, 10.0);
    }
}
