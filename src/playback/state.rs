use super::engine::MediaSource;

/// Coarse state of the playback session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PlayerState {
    #[default]
    Idle,
    Loading,
    /// Loaded and positioned, not playing
    Ready,
    Playing,
    Paused,
    Ended,
    Error(String),
}

impl PlayerState {
    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }
}

/// What is currently loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub guid: String,
    pub title: String,
    pub description: String,
    pub podcast_url: Option<String>,
    pub podcast_title: Option<String>,
    pub image_url: Option<String>,
    pub source: MediaSource,
}

/// Observable snapshot published after every state change and tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerUiState {
    pub state: PlayerState,
    pub now_playing: Option<NowPlaying>,
    pub position_millis: u64,
    pub duration_millis: u64,
    /// `position / duration` in `0.0..=1.0`, 0 while the duration is unknown
    pub progress: f32,
}

impl PlayerUiState {
    pub(crate) fn with_position(mut self, position_millis: u64, duration_millis: u64) -> Self {
        self.position_millis = position_millis;
        self.duration_millis = duration_millis;
        self.progress = if duration_millis > 0 {
            (position_millis as f32 / duration_millis as f32).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }
}
