use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use super::filename::download_file_name;
use super::transfer::{TransferRequest, download_to, remove_if_present};
use crate::error::{DownloadError, StoreError};
use crate::http::HttpClient;
use crate::notify::{Notification, SharedNotifier};
use crate::store::Store;

/// Finished downloads older than this are reclaimed by [`DownloadManager::expire_stale`]
pub const DEFAULT_EXPIRE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Reports whether the network is usable right now
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Connectivity for environments that cannot tell
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// How a download ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed(PathBuf),
    Failed(String),
}

type OutcomeReceiver = watch::Receiver<Option<DownloadOutcome>>;

/// Completion signal for one enqueued download
#[derive(Debug, Clone)]
pub struct DownloadHandle {
    guid: String,
    outcome: OutcomeReceiver,
}

impl DownloadHandle {
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// Wait for the transfer to finish
    pub async fn wait(mut self) -> DownloadOutcome {
        let outcome = self
            .outcome
            .wait_for(Option::is_some)
            .await
            .map(|outcome| outcome.clone());
        match outcome {
            Ok(Some(outcome)) => outcome,
            _ => DownloadOutcome::Failed("download task ended without a result".to_string()),
        }
    }
}

struct Inner<C> {
    client: C,
    store: Store,
    notifier: SharedNotifier,
    connectivity: Arc<dyn Connectivity>,
    downloads_dir: PathBuf,
    in_flight: Mutex<HashMap<String, OutcomeReceiver>>,
    tasks: TaskTracker,
}

/// Downloads episode audio into a local directory and reclaims it later.
///
/// Cheap to clone; clones share in-flight bookkeeping.
pub struct DownloadManager<C> {
    inner: Arc<Inner<C>>,
    expire_after: Duration,
}

impl<C> Clone for DownloadManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            expire_after: self.expire_after,
        }
    }
}

impl<C: HttpClient + 'static> DownloadManager<C> {
    pub fn new(client: C, store: Store, notifier: SharedNotifier, downloads_dir: PathBuf) -> Self {
        Self::with_connectivity(client, store, notifier, downloads_dir, Arc::new(AlwaysOnline))
    }

    pub fn with_connectivity(
        client: C,
        store: Store,
        notifier: SharedNotifier,
        downloads_dir: PathBuf,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                store,
                notifier,
                connectivity,
                downloads_dir,
                in_flight: Mutex::new(HashMap::new()),
                tasks: TaskTracker::new(),
            }),
            expire_after: DEFAULT_EXPIRE_AFTER,
        }
    }

    /// Change how long finished downloads are kept
    pub fn with_expire_after(mut self, expire_after: Duration) -> Self {
        self.expire_after = expire_after;
        self
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.inner.downloads_dir
    }

    /// Start downloading an episode in the background.
    ///
    /// If the same guid is already downloading, a handle to that transfer is
    /// returned instead of starting another. Must be called from within a
    /// tokio runtime.
    pub fn enqueue(&self, guid: &str, audio_url: &str, title: &str) -> Result<DownloadHandle, DownloadError> {
        if !self.inner.connectivity.is_online() {
            return Err(DownloadError::Offline {
                guid: guid.to_string(),
            });
        }

        let mut in_flight = self.lock_in_flight();
        if let Some(existing) = in_flight.get(guid) {
            debug!(%guid, "Download already in flight");
            return Ok(DownloadHandle {
                guid: guid.to_string(),
                outcome: existing.clone(),
            });
        }

        let (sender, outcome) = watch::channel(None);
        in_flight.insert(guid.to_string(), outcome.clone());
        drop(in_flight);

        let manager = self.clone();
        let (task_guid, audio_url, title) = (guid.to_string(), audio_url.to_string(), title.to_string());
        self.inner.tasks.spawn(async move {
            let result = match manager.run(&task_guid, &audio_url, &title).await {
                Ok(path) => DownloadOutcome::Completed(path),
                Err(e) => DownloadOutcome::Failed(e.to_string()),
            };
            manager.lock_in_flight().remove(&task_guid);
            sender.send_replace(Some(result));
        });

        Ok(DownloadHandle {
            guid: guid.to_string(),
            outcome,
        })
    }

    pub fn is_in_flight(&self, guid: &str) -> bool {
        self.lock_in_flight().contains_key(guid)
    }

    /// Download one episode and record the local file on its row.
    ///
    /// Nothing is recorded unless the whole body arrived. If the episode row
    /// has disappeared in the meantime the file is deleted again.
    #[instrument(skip(self, audio_url, title))]
    pub async fn run(&self, guid: &str, audio_url: &str, title: &str) -> Result<PathBuf, DownloadError> {
        match self.transfer(guid, audio_url, title).await {
            Ok(path) => {
                self.inner.notifier.notify(Notification::DownloadCompleted {
                    guid: guid.to_string(),
                    title: title.to_string(),
                    path: path.clone(),
                });
                Ok(path)
            }
            Err(e) => {
                warn!(error = %e, "Download failed");
                self.inner.notifier.notify(Notification::DownloadFailed {
                    guid: guid.to_string(),
                    title: title.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn transfer(&self, guid: &str, audio_url: &str, title: &str) -> Result<PathBuf, DownloadError> {
        let dir = &self.inner.downloads_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DownloadError::CreateDirectoryFailed {
                path: dir.clone(),
                source: e,
            })?;

        let path = dir.join(download_file_name(guid));
        let request = TransferRequest {
            guid,
            title,
            url: audio_url,
        };
        let bytes = download_to(&self.inner.client, request, &path, &self.inner.notifier).await?;

        if let Err(e) = self
            .inner
            .store
            .set_local_file(guid, &path.to_string_lossy())
            .await
        {
            remove_if_present(&path).await;
            return Err(e.into());
        }

        info!(bytes, path = %path.display(), "Download complete");
        Ok(path)
    }

    /// Delete downloads of episodes finished before `cutoff` (epoch millis).
    ///
    /// The stored path is cleared even when the file is already gone.
    /// Returns how many downloads were reclaimed.
    #[instrument(skip(self))]
    pub async fn expire(&self, cutoff: i64) -> Result<usize, DownloadError> {
        let expired = self.inner.store.expired_downloads(cutoff).await?;
        for episode in &expired {
            if let Some(path) = &episode.local_file_path {
                remove_if_present(Path::new(path)).await;
            }
            self.inner.store.clear_local_file(&episode.guid).await?;
            debug!(guid = %episode.guid, "Expired download");
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Reclaimed finished downloads");
        }
        Ok(expired.len())
    }

    /// Expire with the configured retention relative to `now` (epoch millis)
    pub async fn expire_stale(&self, now: i64) -> Result<usize, DownloadError> {
        let retention = i64::try_from(self.expire_after.as_millis()).unwrap_or(i64::MAX);
        self.expire(now.saturating_sub(retention)).await
    }

    /// Remove one episode's download regardless of finished state.
    ///
    /// Returns `false` if the episode had no download.
    #[instrument(skip(self))]
    pub async fn delete_download(&self, guid: &str) -> Result<bool, DownloadError> {
        let episode = self
            .inner
            .store
            .episode(guid)
            .await?
            .ok_or_else(|| StoreError::EpisodeNotFound {
                guid: guid.to_string(),
            })?;

        let Some(path) = episode.local_file_path else {
            return Ok(false);
        };
        remove_if_present(Path::new(&path)).await;
        self.inner.store.clear_local_file(guid).await?;
        Ok(true)
    }

    /// Wait for every download started so far
    pub async fn wait_idle(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, OutcomeReceiver>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
