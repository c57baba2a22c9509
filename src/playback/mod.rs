//! The playback engine: one active session, an ordered queue, transport
//! state and crossfade priming, all mutated through a single-consumer
//! command loop.

pub mod commands;
pub mod engine;
pub mod events;
pub mod queue;
pub mod session;

pub use commands::PlayerCommand;
pub use engine::{Player, PlayerHandle};
pub use events::PlayerEvent;
pub use queue::TrackQueue;
pub use session::{PlaybackSession, PlayerState, SessionSnapshot};
