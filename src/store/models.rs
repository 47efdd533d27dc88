use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A podcast row, keyed by its feed URL
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Podcast {
    pub url: String,
    pub title: String,
    pub image_url: Option<String>,
}

/// An episode row
///
/// `title`, `description`, `pub_date`, `audio_url` and `duration` come from
/// the feed and are rewritten by every sync. `progress_in_millis`,
/// `local_file_path` and `finished_at` belong to playback and downloads and
/// survive re-sync.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Episode {
    pub guid: String,
    pub podcast_url: String,
    pub title: String,
    pub description: String,
    /// Publication time, epoch milliseconds
    pub pub_date: i64,
    pub audio_url: String,
    /// Length in seconds, 0 when the feed doesn't say
    pub duration: i64,
    pub progress_in_millis: i64,
    pub local_file_path: Option<String>,
    /// When the episode was marked finished, epoch milliseconds
    pub finished_at: Option<i64>,
}

impl Episode {
    pub fn duration_millis(&self) -> i64 {
        self.duration.saturating_mul(1000)
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn is_downloaded(&self) -> bool {
        self.local_file_path.is_some()
    }
}

/// A feed the user is subscribed to
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Subscription {
    pub url: String,
    pub title: Option<String>,
    /// Epoch milliseconds
    pub date_added: i64,
}

/// The minimum needed to bring a playback session back after a restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub last_guid: String,
    pub last_position_millis: i64,
    pub last_is_playing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub podcast_url: Option<String>,
}

/// User-owned fields of one stored episode
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow)]
pub struct UserState {
    pub progress_in_millis: i64,
    pub finished_at: Option<i64>,
    pub local_file_path: Option<String>,
    pub pub_date: i64,
}

/// User state of every stored episode, read once per sync pass
#[derive(Debug, Clone, Default)]
pub struct UserStateSnapshot {
    entries: HashMap<String, UserState>,
}

impl UserStateSnapshot {
    pub fn new(entries: HashMap<String, UserState>) -> Self {
        Self { entries }
    }

    pub fn get(&self, guid: &str) -> Option<&UserState> {
        self.entries.get(guid)
    }

    pub fn contains(&self, guid: &str) -> bool {
        self.entries.contains_key(guid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, UserState)> for UserStateSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, UserState)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
