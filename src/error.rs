use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when fetching or parsing RSS feeds
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to fetch feed from {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to read feed file {path}: {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse RSS feed: {0}")]
    ParseFailed(#[from] rss::Error),
}

/// Errors that can occur when parsing an OPML subscription list
#[derive(Error, Debug)]
pub enum OpmlError {
    #[error("Malformed OPML document at byte {position}: {source}")]
    Malformed {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("Document has no <opml> root element")]
    NotOpml,
}

/// Errors raised by the SQLite-backed episode store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Database query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Episode {guid} not found")]
    EpisodeNotFound { guid: String },

    #[error("Corrupt value for key '{key}': {source}")]
    CorruptValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that can occur during episode downloads
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("No network connectivity, download of {guid} deferred")]
    Offline { guid: String },

    #[error("HTTP request failed for {url}: {source}")]
    HttpFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create file {path}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move {from} into place: {source}")]
    FinalizeFailed {
        from: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream error while downloading {url}: {source}")]
    StreamFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors reported by a playback engine implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EngineError(pub String);

/// Errors surfaced by the playback session controller
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Playback engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Episode {guid} is not in the store and no audio URL was given")]
    UnknownEpisode { guid: String },

    #[error("Nothing is loaded")]
    NothingLoaded,

    #[error("Playback controller has shut down")]
    ControllerGone,
}

/// Top-level errors for sync operations
///
/// Per-feed failures never surface here; they are collected in the report.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("OPML error: {0}")]
    Opml(#[from] OpmlError),
}

/// Errors that can occur when loading the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Errors returned from action dispatch
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
