// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{FeedError, StoreError, SyncError};
use crate::feed::{ParsedFeed, fetch_feed_bytes, parse_feed, parse_opml, read_feed_file};
use crate::http::HttpClient;
use crate::notify::{Notification, SharedNotifier};
use crate::store::{Episode, Podcast, Store, Subscription, UserStateSnapshot, now_millis};

/// Episodes published this recently (relative to refresh start) count as new
pub const DEFAULT_NEW_EPISODE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// A feed that could not be refreshed in a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFailure {
    pub url: String,
    pub error: String,
}

/// Outcome of a refresh pass
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Episodes seen for the first time and published recently
    pub new_episodes: Vec<Episode>,
    /// Feeds merged successfully
    pub refreshed: Vec<String>,
    pub failed: Vec<FeedFailure>,
}

impl SyncReport {
    /// `true` when there were feeds to refresh and none of them succeeded
    pub fn is_complete_failure(&self) -> bool {
        self.refreshed.is_empty() && !self.failed.is_empty()
    }
}

/// A parsed feed reconciled with the stored user state, ready to upsert
#[derive(Debug, Clone)]
pub struct MergedFeed {
    pub podcast: Podcast,
    pub episodes: Vec<Episode>,
    pub new_episodes: Vec<Episode>,
}

#[derive(Error, Debug)]
enum FeedSyncError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Guid for an item that has none: the podcast title plus a short hash of
/// the episode title.
///
/// Stable across passes. Two podcasts with the same title and an identically
/// titled episode collide.
pub fn fallback_guid(podcast_title: &str, episode_title: &str) -> String {
    let digest = Sha256::digest(episode_title.as_bytes());
    let hash: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("{podcast_title}-{hash}")
}

/// Reconcile a freshly parsed feed with the user state snapshot.
///
/// Feed content wins for content fields; progress, finished time and local
/// file are carried over from the snapshot so the upsert never loses them.
/// A missing publication date falls back to the stored one, then to
/// `refresh_started_at`. Items repeating an earlier guid are dropped.
pub fn merge_feed(
    podcast_url: &str,
    feed: &ParsedFeed,
    snapshot: &UserStateSnapshot,
    refresh_started_at: i64,
    new_episode_window: Duration,
) -> MergedFeed {
    let window = i64::try_from(new_episode_window.as_millis()).unwrap_or(i64::MAX);
    let new_since = refresh_started_at.saturating_sub(window);

    let podcast = Podcast {
        url: podcast_url.to_string(),
        title: feed.title.clone(),
        image_url: feed.image_url.clone(),
    };

    let mut seen = HashSet::new();
    let mut episodes = Vec::with_capacity(feed.episodes.len());
    let mut new_episodes = Vec::new();

    for item in &feed.episodes {
        let guid = item
            .guid
            .clone()
            .unwrap_or_else(|| fallback_guid(&feed.title, &item.title));
        if !seen.insert(guid.clone()) {
            debug!(%guid, "Skipping repeated guid in feed");
            continue;
        }

        let stored = snapshot.get(&guid);
        let pub_date = item
            .pub_date
            .or(stored.map(|state| state.pub_date))
            .unwrap_or(refresh_started_at);
        let state = stored.cloned().unwrap_or_default();

        let episode = Episode {
            guid,
            podcast_url: podcast_url.to_string(),
            title: item.title.clone(),
            description: item.description.clone().unwrap_or_default(),
            pub_date,
            audio_url: item.audio_url.clone().unwrap_or_default(),
            duration: item.duration_seconds.unwrap_or(0),
            progress_in_millis: state.progress_in_millis,
            local_file_path: state.local_file_path,
            finished_at: state.finished_at,
        };

        if stored.is_none() && pub_date > new_since {
            new_episodes.push(episode.clone());
        }
        episodes.push(episode);
    }

    MergedFeed {
        podcast,
        episodes,
        new_episodes,
    }
}

/// Keeps the store in step with the subscribed feeds
pub struct SyncEngine<C: HttpClient> {
    client: C,
    store: Store,
    notifier: SharedNotifier,
    new_episode_window: Duration,
}

impl<C: HttpClient> SyncEngine<C> {
    pub fn new(client: C, store: Store, notifier: SharedNotifier) -> Self {
        Self {
            client,
            store,
            notifier,
            new_episode_window: DEFAULT_NEW_EPISODE_WINDOW,
        }
    }

    pub fn with_new_episode_window(mut self, window: Duration) -> Self {
        self.new_episode_window = window;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Refresh every subscription in turn.
    ///
    /// A feed that fails to fetch, parse or save is logged and listed in the
    /// report; the others still sync. The pass is recorded as the last sync
    /// unless every feed failed.
    #[instrument(skip(self))]
    pub async fn refresh_all(&self) -> Result<SyncReport, SyncError> {
        let urls = self.store.subscribed_urls().await?;
        info!(feeds = urls.len(), "Refreshing subscriptions");

        let report = self.refresh(&urls).await?;
        if !report.is_complete_failure() {
            self.store.set_last_sync_at(now_millis()).await?;
        }

        info!(
            refreshed = report.refreshed.len(),
            failed = report.failed.len(),
            new = report.new_episodes.len(),
            "Refresh finished"
        );
        Ok(report)
    }

    /// Refresh a single feed, e.g. right after subscribing to it
    #[instrument(skip(self))]
    pub async fn refresh_feed(&self, url: &str) -> Result<SyncReport, SyncError> {
        self.refresh(&[url.to_string()]).await
    }

    /// Subscribe to a feed; returns `false` if already subscribed
    #[instrument(skip(self))]
    pub async fn subscribe(&self, url: &str, title: Option<&str>) -> Result<bool, SyncError> {
        let added = self
            .store
            .subscribe(&Subscription {
                url: url.to_string(),
                title: title.map(str::to_string),
                date_added: now_millis(),
            })
            .await?;
        Ok(added)
    }

    /// Drop a subscription along with its podcast and episodes
    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, url: &str) -> Result<bool, SyncError> {
        Ok(self.store.unsubscribe(url).await?)
    }

    /// Subscribe to every feed listed in an OPML document.
    ///
    /// Returns how many were not subscribed before.
    #[instrument(skip(self, opml))]
    pub async fn import_opml(&self, opml: &[u8]) -> Result<u64, SyncError> {
        let date_added = now_millis();
        let subscriptions: Vec<Subscription> = parse_opml(opml)?
            .into_iter()
            .map(|entry| Subscription {
                url: entry.feed_url,
                title: entry.title,
                date_added,
            })
            .collect();

        let inserted = self.store.insert_subscriptions(&subscriptions).await?;
        info!(listed = subscriptions.len(), inserted, "Imported OPML");
        Ok(inserted)
    }

    pub async fn has_subscriptions(&self) -> Result<bool, SyncError> {
        Ok(self.store.subscription_count().await? > 0)
    }

    async fn refresh(&self, urls: &[String]) -> Result<SyncReport, SyncError> {
        let started_at = now_millis();
        let snapshot = self.store.user_state_snapshot().await?;
        let mut report = SyncReport::default();

        for url in urls {
            match self.sync_feed(url, &snapshot, started_at).await {
                Ok(merged) => {
                    debug!(
                        %url,
                        episodes = merged.episodes.len(),
                        new = merged.new_episodes.len(),
                        "Feed merged"
                    );
                    report.refreshed.push(url.clone());
                    report.new_episodes.extend(merged.new_episodes);
                }
                Err(error) => {
                    warn!(%url, %error, "Feed refresh failed");
                    report.failed.push(FeedFailure {
                        url: url.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }

        if !report.new_episodes.is_empty() {
            self.notifier.notify(Notification::NewEpisodes {
                episodes: report.new_episodes.clone(),
            });
        }
        Ok(report)
    }

    async fn sync_feed(
        &self,
        url: &str,
        snapshot: &UserStateSnapshot,
        started_at: i64,
    ) -> Result<MergedFeed, FeedSyncError> {
        let bytes = self.load_feed_bytes(url).await?;
        let feed = parse_feed(&bytes)?;
        let merged = merge_feed(url, &feed, snapshot, started_at, self.new_episode_window);
        self.store.save_feed(&merged.podcast, &merged.episodes).await?;
        Ok(merged)
    }

    /// HTTP(S) URLs are fetched; `file://` URLs and bare paths are read from disk
    async fn load_feed_bytes(&self, source: &str) -> Result<Vec<u8>, FeedError> {
        match Url::parse(source) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                Ok(fetch_feed_bytes(&self.client, source).await?.to_vec())
            }
            Ok(url) if url.scheme() == "file" => match url.to_file_path() {
                Ok(path) => read_feed_file(&path),
                Err(()) => read_feed_file(Path::new(url.path())),
            },
            _ => read_feed_file(Path::new(source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ParsedEpisode;
    use crate::notify::NoopNotifier;
    use crate::test_support::{MockHttpClient, RecordingNotifier};
    use chrono::Utc;

    const FEED_A: &str = "https://a.example.com/feed.xml";
    const FEED_B: &str = "https://b.example.com/feed.xml";

    struct Item<'a> {
        guid: Option<&'a str>,
        title: &'a str,
        hours_ago: Option<i64>,
    }

    fn item<'a>(guid: &'a str, title: &'a str, hours_ago: i64) -> Item<'a> {
        Item {
            guid: Some(guid),
            title,
            hours_ago: Some(hours_ago),
        }
    }

    fn rss(title: &str, items: &[Item]) -> String {
        let mut body = String::new();
        for item in items {
            body.push_str("<item>");
            body.push_str(&format!("<title>{}</title>", item.title));
            if let Some(guid) = item.guid {
                body.push_str(&format!("<guid>{guid}</guid>"));
            }
            if let Some(hours) = item.hours_ago {
                let date = Utc::now() - chrono::Duration::hours(hours);
                body.push_str(&format!("<pubDate>{}</pubDate>", date.to_rfc2822()));
            }
            body.push_str(&format!(
                r#"<enclosure url="https://cdn.example.com/{}.mp3" length="1" type="audio/mpeg"/>"#,
                item.title.replace(' ', "-")
            ));
            body.push_str("</item>");
        }
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{title}</title><link>https://example.com</link><description>d</description>{body}</channel></rss>"#
        )
    }

    fn parsed(title: &str, items: Vec<ParsedEpisode>) -> ParsedFeed {
        ParsedFeed {
            title: title.to_string(),
            image_url: None,
            episodes: items,
        }
    }

    fn parsed_episode(guid: Option<&str>, title: &str, pub_date: Option<i64>) -> ParsedEpisode {
        ParsedEpisode {
            title: title.to_string(),
            guid: guid.map(str::to_string),
            pub_date,
            duration_seconds: Some(60),
            audio_url: Some(format!("https://cdn.example.com/{title}.mp3")),
            description: None,
        }
    }

    async fn engine_with(
        client: MockHttpClient,
        feeds: &[&str],
    ) -> SyncEngine<MockHttpClient> {
        let store = Store::open_in_memory().await.unwrap();
        let engine = SyncEngine::new(client, store, NoopNotifier::shared());
        for url in feeds {
            engine.subscribe(url, None).await.unwrap();
        }
        engine
    }

    #[test]
    fn fallback_guid_is_stable_and_title_specific() {
        let first = fallback_guid("Show", "Episode 1");
        assert_eq!(first, fallback_guid("Show", "Episode 1"));
        assert_ne!(first, fallback_guid("Show", "Episode 2"));
        assert!(first.starts_with("Show-"));
        assert_eq!(first.len(), "Show-".len() + 16);
    }

    #[test]
    fn merge_copies_user_state_from_snapshot() {
        let snapshot: UserStateSnapshot = [(
            "g1".to_string(),
            crate::store::UserState {
                progress_in_millis: 30_000,
                finished_at: Some(5),
                local_file_path: Some("/tmp/g1.mp3".to_string()),
                pub_date: 1_000,
            },
        )]
        .into_iter()
        .collect();
        let feed = parsed("Show", vec![parsed_episode(Some("g1"), "One", Some(2_000))]);

        let merged = merge_feed(FEED_A, &feed, &snapshot, 10_000, DEFAULT_NEW_EPISODE_WINDOW);

        let episode = &merged.episodes[0];
        assert_eq!(episode.progress_in_millis, 30_000);
        assert_eq!(episode.finished_at, Some(5));
        assert_eq!(episode.local_file_path.as_deref(), Some("/tmp/g1.mp3"));
        assert_eq!(episode.pub_date, 2_000);
        assert_eq!(episode.duration, 60);
        assert!(merged.new_episodes.is_empty());
    }

    #[test]
    fn merge_detects_new_episodes_inside_window() {
        let now = 100 * 3_600_000;
        let feed = parsed(
            "Show",
            vec![
                parsed_episode(Some("fresh"), "Fresh", Some(now - 3_600_000)),
                parsed_episode(Some("old"), "Old", Some(now - 48 * 3_600_000)),
            ],
        );

        let merged = merge_feed(FEED_A, &feed, &UserStateSnapshot::default(), now, DEFAULT_NEW_EPISODE_WINDOW);

        let new: Vec<_> = merged.new_episodes.iter().map(|e| e.guid.as_str()).collect();
        assert_eq!(new, vec!["fresh"]);
        assert_eq!(merged.episodes.len(), 2);
    }

    #[test]
    fn merge_fills_missing_dates_and_guids() {
        let snapshot: UserStateSnapshot = [(
            "known".to_string(),
            crate::store::UserState {
                pub_date: 777,
                ..Default::default()
            },
        )]
        .into_iter()
        .collect();
        let feed = parsed(
            "Show",
            vec![
                parsed_episode(Some("known"), "Known", None),
                parsed_episode(None, "Guidless", None),
            ],
        );

        let merged = merge_feed(FEED_A, &feed, &snapshot, 9_999, DEFAULT_NEW_EPISODE_WINDOW);

        assert_eq!(merged.episodes[0].pub_date, 777);
        assert_eq!(merged.episodes[1].guid, fallback_guid("Show", "Guidless"));
        assert_eq!(merged.episodes[1].pub_date, 9_999);
    }

    #[test]
    fn merge_drops_repeated_guids() {
        let feed = parsed(
            "Show",
            vec![
                parsed_episode(Some("g"), "First", Some(1)),
                parsed_episode(Some("g"), "Second", Some(2)),
            ],
        );

        let merged = merge_feed(FEED_A, &feed, &UserStateSnapshot::default(), 10, DEFAULT_NEW_EPISODE_WINDOW);

        assert_eq!(merged.episodes.len(), 1);
        assert_eq!(merged.episodes[0].title, "First");
    }

    #[tokio::test]
    async fn refresh_is_idempotent() {
        let client = MockHttpClient::new().with_body(
            FEED_A,
            rss("Show A", &[item("g1", "One", 2), item("g2", "Two", 72)]),
        );
        let engine = engine_with(client, &[FEED_A]).await;

        let first = engine.refresh_all().await.unwrap();
        let stored_first = engine.store().episodes().await.unwrap();
        let second = engine.refresh_all().await.unwrap();
        let stored_second = engine.store().episodes().await.unwrap();

        assert_eq!(first.new_episodes.len(), 1);
        assert!(second.new_episodes.is_empty());
        assert_eq!(stored_first, stored_second);
        assert_eq!(stored_second.len(), 2);
    }

    #[tokio::test]
    async fn refresh_preserves_user_state() {
        let client = MockHttpClient::new().with_body(FEED_A, rss("Show A", &[item("g1", "One", 2)]));
        let engine = engine_with(client.clone(), &[FEED_A]).await;
        engine.refresh_all().await.unwrap();

        let store = engine.store();
        store.save_progress("g1", 45_000).await.unwrap();
        store.set_local_file("g1", "/data/g1.mp3").await.unwrap();
        store.mark_finished("g1", Some(50_000), 123).await.unwrap();

        client.set_body(FEED_A, rss("Show A", &[item("g1", "One (remastered)", 2)]));
        engine.refresh_all().await.unwrap();

        let episode = store.episode("g1").await.unwrap().unwrap();
        assert_eq!(episode.title, "One (remastered)");
        assert_eq!(episode.progress_in_millis, 50_000);
        assert_eq!(episode.local_file_path.as_deref(), Some("/data/g1.mp3"));
        assert_eq!(episode.finished_at, Some(123));
    }

    #[tokio::test]
    async fn episodes_removed_upstream_are_kept() {
        let client = MockHttpClient::new().with_body(
            FEED_A,
            rss("Show A", &[item("g1", "One", 2), item("g2", "Two", 3)]),
        );
        let engine = engine_with(client.clone(), &[FEED_A]).await;
        engine.refresh_all().await.unwrap();

        client.set_body(FEED_A, rss("Show A", &[item("g2", "Two", 3)]));
        engine.refresh_all().await.unwrap();

        assert_eq!(engine.store().episode_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn failing_feed_does_not_block_others() {
        let client = MockHttpClient::new()
            .with_body(FEED_A, "definitely not xml")
            .with_body(FEED_B, rss("Show B", &[item("b1", "B One", 1)]));
        let engine = engine_with(client, &[FEED_A, FEED_B, "https://gone.example.com/feed"]).await;

        let report = engine.refresh_all().await.unwrap();

        assert_eq!(report.refreshed, vec![FEED_B.to_string()]);
        let failed: Vec<_> = report.failed.iter().map(|f| f.url.as_str()).collect();
        assert_eq!(failed, vec![FEED_A, "https://gone.example.com/feed"]);
        assert!(engine.store().episode("b1").await.unwrap().is_some());
        assert!(engine.store().last_sync_at().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn complete_failure_is_not_recorded_as_sync() {
        let engine = engine_with(MockHttpClient::new(), &[FEED_A]).await;

        let report = engine.refresh_all().await.unwrap();

        assert!(report.is_complete_failure());
        assert_eq!(engine.store().last_sync_at().await.unwrap(), None);
    }

    #[tokio::test]
    async fn new_episodes_are_announced() {
        let client = MockHttpClient::new().with_body(FEED_A, rss("Show A", &[item("g1", "One", 1)]));
        let store = Store::open_in_memory().await.unwrap();
        let notifier = RecordingNotifier::shared();
        let engine = SyncEngine::new(client, store, notifier.clone());
        engine.subscribe(FEED_A, Some("A")).await.unwrap();

        engine.refresh_all().await.unwrap();
        engine.refresh_all().await.unwrap();

        let events = notifier.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Notification::NewEpisodes { episodes } => assert_eq!(episodes[0].guid, "g1"),
            other => panic!("Expected NewEpisodes, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn guidless_items_keep_their_identity_across_passes() {
        let items = [Item {
            guid: None,
            title: "No Guid",
            hours_ago: None,
        }];
        let client = MockHttpClient::new().with_body(FEED_A, rss("Show A", &items));
        let engine = engine_with(client, &[FEED_A]).await;

        engine.refresh_all().await.unwrap();
        let guid = fallback_guid("Show A", "No Guid");
        let first = engine.store().episode(&guid).await.unwrap().unwrap();
        engine.refresh_all().await.unwrap();
        let second = engine.store().episode(&guid).await.unwrap().unwrap();

        assert_eq!(engine.store().episode_count().await.unwrap(), 1);
        assert_eq!(first.pub_date, second.pub_date);
    }

    #[tokio::test]
    async fn feeds_can_be_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.xml");
        std::fs::write(&path, rss("Local", &[item("l1", "Local One", 5)])).unwrap();
        let source = path.to_string_lossy().into_owned();
        let engine = engine_with(MockHttpClient::new(), &[source.as_str()]).await;

        let report = engine.refresh_all().await.unwrap();

        assert_eq!(report.refreshed, vec![source.clone()]);
        assert_eq!(engine.store().podcast(&source).await.unwrap().unwrap().title, "Local");
    }

    #[tokio::test]
    async fn import_opml_subscribes_new_feeds() {
        let engine = engine_with(MockHttpClient::new(), &[FEED_A]).await;
        assert!(engine.has_subscriptions().await.unwrap());

        let opml = format!(
            r#"<opml version="2.0"><body>
                <outline text="A" xmlUrl="{FEED_A}"/>
                <outline text="B" xmlUrl="{FEED_B}"/>
                <outline text="folder"/>
            </body></opml>"#
        );
        let inserted = engine.import_opml(opml.as_bytes()).await.unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(engine.store().subscription_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn import_rejects_non_opml() {
        let engine = engine_with(MockHttpClient::new(), &[]).await;
        assert!(!engine.has_subscriptions().await.unwrap());

        let result = engine.import_opml(b"<html><body/></html>").await;
        assert!(matches!(result, Err(SyncError::Opml(_))));
    }

    #[tokio::test]
    async fn unsubscribe_cascades_to_episodes() {
        let client = MockHttpClient::new().with_body(FEED_A, rss("Show A", &[item("g1", "One", 2)]));
        let engine = engine_with(client, &[FEED_A]).await;
        engine.refresh_all().await.unwrap();

        assert!(engine.unsubscribe(FEED_A).await.unwrap());

        assert_eq!(engine.store().episode_count().await.unwrap(), 0);
        assert!(!engine.has_subscriptions().await.unwrap());
    }
}
