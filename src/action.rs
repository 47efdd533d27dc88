use std::fmt;

use crate::playback::PlayRequest;
use crate::store::now_millis;

/// Who triggered an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Originator {
    /// Direct user input
    User,
    /// The application itself, e.g. startup or a scheduled job
    App,
    /// The platform, e.g. headset buttons or a media session
    Device,
}

impl fmt::Display for Originator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::App => "app",
            Self::Device => "device",
        })
    }
}

/// Provenance attached to every action for tracing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Free-form name of the call site, e.g. "cli" or "notification"
    pub source: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub originator: Originator,
}

impl Origin {
    pub fn new(originator: Originator, source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            timestamp: now_millis(),
            originator,
        }
    }

    pub fn user(source: impl Into<String>) -> Self {
        Self::new(Originator::User, source)
    }

    pub fn app(source: impl Into<String>) -> Self {
        Self::new(Originator::App, source)
    }

    pub fn device(source: impl Into<String>) -> Self {
        Self::new(Originator::Device, source)
    }
}

/// Everything the outer layers can ask the core to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    RefreshAll { origin: Origin },
    RefreshFeed { url: String, origin: Origin },
    Subscribe { url: String, title: Option<String>, origin: Origin },
    Unsubscribe { url: String, origin: Origin },
    ImportOpml { document: Vec<u8>, origin: Origin },
    Play { request: PlayRequest, origin: Origin },
    Pause { origin: Origin },
    TogglePlayPause { origin: Origin },
    Stop { origin: Origin },
    SeekBack { origin: Origin },
    SeekForward { origin: Origin },
    SeekTo { position_millis: u64, origin: Origin },
    MarkAsFinished { guid: String, origin: Origin },
    Download { guid: String, origin: Origin },
    DeleteDownload { guid: String, origin: Origin },
}

impl Action {
    pub fn origin(&self) -> &Origin {
        match self {
            Self::RefreshAll { origin }
            | Self::RefreshFeed { origin, .. }
            | Self::Subscribe { origin, .. }
            | Self::Unsubscribe { origin, .. }
            | Self::ImportOpml { origin, .. }
            | Self::Play { origin, .. }
            | Self::Pause { origin }
            | Self::TogglePlayPause { origin }
            | Self::Stop { origin }
            | Self::SeekBack { origin }
            | Self::SeekForward { origin }
            | Self::SeekTo { origin, .. }
            | Self::MarkAsFinished { origin, .. }
            | Self::Download { origin, .. }
            | Self::DeleteDownload { origin, .. } => origin,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::RefreshAll { .. } => "refresh_all",
            Self::RefreshFeed { .. } => "refresh_feed",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::ImportOpml { .. } => "import_opml",
            Self::Play { .. } => "play",
            Self::Pause { .. } => "pause",
            Self::TogglePlayPause { .. } => "toggle_play_pause",
            Self::Stop { .. } => "stop",
            Self::SeekBack { .. } => "seek_back",
            Self::SeekForward { .. } => "seek_forward",
            Self::SeekTo { .. } => "seek_to",
            Self::MarkAsFinished { .. } => "mark_as_finished",
            Self::Download { .. } => "download",
            Self::DeleteDownload { .. } => "delete_download",
        }
    }
}
