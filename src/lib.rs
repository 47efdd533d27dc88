pub mod action;
pub mod app;
pub mod config;
pub mod download;
pub mod error;
pub mod feed;
pub mod http;
pub mod notify;
pub mod playback;
pub mod schedule;
pub mod store;
pub mod sync;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use action::{Action, Origin, Originator};
pub use app::{ActionOutcome, Podder, StartupReport};
pub use config::Config;
pub use download::{Connectivity, DownloadHandle, DownloadManager, DownloadOutcome};
pub use error::{
    AppError, ConfigError, DownloadError, EngineError, FeedError, OpmlError, PlaybackError,
    StoreError, SyncError,
};
pub use feed::{OpmlEntry, ParsedEpisode, ParsedFeed, parse_feed, parse_opml};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use notify::{NoopNotifier, Notification, Notifier, SharedNotifier};
pub use playback::{
    MediaSource, NullEngine, PlayRequest, PlaybackController, PlaybackEngine, PlayerState, PlayerUiState,
};
pub use schedule::{JobOutcome, Scheduler, SyncPolicy};
pub use store::{Episode, Podcast, SessionSnapshot, Store, Subscription};
pub use sync::{SyncEngine, SyncReport, fallback_guid, merge_feed};
