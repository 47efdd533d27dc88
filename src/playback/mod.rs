//! Playback session control: one engine, one session, progress that
//! survives restarts.

mod controller;
mod engine;
mod heartbeat;
mod state;
mod writer;

pub use controller::{PlayRequest, PlaybackController, PlaybackSettings, RestoreOutcome};
pub use engine::{EngineStatus, MediaSource, NullEngine, PlaybackEngine};
pub use heartbeat::Heartbeat;
pub use state::{NowPlaying, PlayerState, PlayerUiState};
pub use writer::SessionWriter;
