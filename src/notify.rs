use std::path::PathBuf;
use std::sync::Arc;

use crate::store::Episode;

/// Events the core hands to the notification collaborator
#[derive(Debug, Clone)]
pub enum Notification {
    /// A sync pass found recently published episodes
    NewEpisodes { episodes: Vec<Episode> },

    /// A download transfer is starting
    DownloadStarted {
        guid: String,
        title: String,
        /// Expected content length in bytes, if known
        content_length: Option<u64>,
    },

    /// Download progress update
    DownloadProgress {
        guid: String,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },

    /// A download finished and the episode now has a local file
    DownloadCompleted {
        guid: String,
        title: String,
        path: PathBuf,
    },

    /// A download failed; nothing was recorded for the episode
    DownloadFailed {
        guid: String,
        title: String,
        error: String,
    },
}

/// Receiver for [`Notification`]s.
///
/// Implementations can show system notifications, drive progress bars, or
/// collect events in tests.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// A shared reference to a notifier
pub type SharedNotifier = Arc<dyn Notifier>;

/// A notifier that silently drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: Notification) {}
}

impl NoopNotifier {
    /// Create a new NoopNotifier wrapped in an Arc
    pub fn shared() -> SharedNotifier {
        Arc::new(Self)
    }
}
