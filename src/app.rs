use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::action::Action;
use crate::config::Config;
use crate::download::{DownloadHandle, DownloadManager};
use crate::error::{AppError, StoreError};
use crate::http::HttpClient;
use crate::notify::SharedNotifier;
use crate::playback::{PlaybackController, PlaybackEngine, RestoreOutcome};
use crate::schedule::{Scheduler, SyncPolicy};
use crate::store::{Episode, Store, now_millis};
use crate::sync::{SyncEngine, SyncReport};

/// What [`Podder::startup`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub expired_downloads: usize,
    pub restored: RestoreOutcome,
}

/// What a dispatched action produced
#[derive(Debug)]
pub enum ActionOutcome {
    /// Playback commands report through the controller's state stream
    Done,
    Synced(SyncReport),
    /// The refresh of a newly added feed; `None` if it was already subscribed
    Subscribed(Option<SyncReport>),
    /// Whether a subscription was removed
    Unsubscribed(bool),
    /// Number of subscriptions added
    Imported(u64),
    /// Position after a clamped seek
    Seeked(u64),
    Finished(Episode),
    DownloadStarted(DownloadHandle),
    /// Whether there was a download to delete
    DownloadDeleted(bool),
}

/// The wired-up core: one store, one sync engine, one download manager and
/// one playback session.
pub struct Podder<C: HttpClient + 'static> {
    store: Store,
    sync: Arc<SyncEngine<C>>,
    downloads: DownloadManager<C>,
    playback: PlaybackController,
    policy: SyncPolicy,
}

impl<C: HttpClient + Clone + 'static> Podder<C> {
    /// Build every service from `config`. Must be called within a tokio runtime.
    pub fn new(
        client: C,
        store: Store,
        notifier: SharedNotifier,
        engine: Box<dyn PlaybackEngine>,
        config: &Config,
    ) -> Self {
        let sync = SyncEngine::new(client.clone(), store.clone(), notifier.clone())
            .with_new_episode_window(config.new_episode_window());
        let downloads = DownloadManager::new(client, store.clone(), notifier, config.downloads_dir())
            .with_expire_after(config.expire_after());
        let playback = PlaybackController::spawn(engine, store.clone(), config.playback_settings());

        Self {
            store,
            sync: Arc::new(sync),
            downloads,
            playback,
            policy: config.sync_policy(),
        }
    }
}

impl<C: HttpClient + 'static> Podder<C> {
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn sync(&self) -> &SyncEngine<C> {
        &self.sync
    }

    pub fn downloads(&self) -> &DownloadManager<C> {
        &self.downloads
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    /// Scheduler sharing this instance's services
    pub fn scheduler(&self) -> Scheduler<C> {
        Scheduler::new(self.sync.clone(), self.downloads.clone(), self.policy.clone())
    }

    /// Reclaim stale downloads, then bring back the last playback session
    #[instrument(skip(self))]
    pub async fn startup(&self) -> Result<StartupReport, AppError> {
        let expired_downloads = self.downloads.expire_stale(now_millis()).await?;
        let restored = self.playback.restore().await?;
        info!(expired_downloads, ?restored, "Startup complete");
        Ok(StartupReport {
            expired_downloads,
            restored,
        })
    }

    /// Carry out one action
    #[instrument(
        skip(self, action),
        fields(
            action = action.name(),
            originator = %action.origin().originator,
            source = %action.origin().source,
        )
    )]
    pub async fn dispatch(&self, action: Action) -> Result<ActionOutcome, AppError> {
        info!(timestamp = action.origin().timestamp, "Dispatching action");

        let outcome = match action {
            Action::RefreshAll { .. } => ActionOutcome::Synced(self.sync.refresh_all().await?),
            Action::RefreshFeed { url, .. } => {
                ActionOutcome::Synced(self.sync.refresh_feed(&url).await?)
            }
            Action::Subscribe { url, title, .. } => {
                let report = if self.sync.subscribe(&url, title.as_deref()).await? {
                    Some(self.sync.refresh_feed(&url).await?)
                } else {
                    None
                };
                ActionOutcome::Subscribed(report)
            }
            Action::Unsubscribe { url, .. } => {
                ActionOutcome::Unsubscribed(self.sync.unsubscribe(&url).await?)
            }
            Action::ImportOpml { document, .. } => {
                ActionOutcome::Imported(self.sync.import_opml(&document).await?)
            }
            Action::Play { request, .. } => {
                self.playback.play(request).await?;
                ActionOutcome::Done
            }
            Action::Pause { .. } => {
                self.playback.pause().await?;
                ActionOutcome::Done
            }
            Action::TogglePlayPause { .. } => {
                self.playback.toggle_play_pause().await?;
                ActionOutcome::Done
            }
            Action::Stop { .. } => {
                self.playback.stop().await?;
                ActionOutcome::Done
            }
            Action::SeekBack { .. } => ActionOutcome::Seeked(self.playback.seek_back().await?),
            Action::SeekForward { .. } => {
                ActionOutcome::Seeked(self.playback.seek_forward().await?)
            }
            Action::SeekTo {
                position_millis, ..
            } => ActionOutcome::Seeked(self.playback.seek_to(position_millis).await?),
            Action::MarkAsFinished { guid, .. } => {
                ActionOutcome::Finished(self.store.mark_finished(&guid, None, now_millis()).await?)
            }
            Action::Download { guid, .. } => {
                let episode = self
                    .store
                    .episode(&guid)
                    .await?
                    .ok_or_else(|| StoreError::EpisodeNotFound { guid: guid.clone() })?;
                let handle = self
                    .downloads
                    .enqueue(&episode.guid, &episode.audio_url, &episode.title)?;
                ActionOutcome::DownloadStarted(handle)
            }
            Action::DeleteDownload { guid, .. } => {
                ActionOutcome::DownloadDeleted(self.downloads.delete_download(&guid).await?)
            }
        };
        Ok(outcome)
    }

    /// Let pending playback writes and downloads finish
    pub async fn shutdown(&self) {
        if let Err(error) = self.playback.flush_pending_writes().await {
            warn!(%error, "Could not flush playback writes");
        }
        self.downloads.wait_idle().await;
        info!("Shut down");
    }
}
