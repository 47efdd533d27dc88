use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::download::DownloadManager;
use crate::error::SyncError;
use crate::http::HttpClient;
use crate::store::now_millis;
use crate::sync::{SyncEngine, SyncReport};

/// When background sync runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Time between unconditional refreshes
    pub periodic_interval: Duration,
    /// A last sync older than this is refreshed on startup
    pub stale_after: Duration,
    /// Wait before retrying a failed refresh
    pub retry_after: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            periodic_interval: Duration::from_secs(6 * 60 * 60),
            stale_after: Duration::from_secs(60 * 60),
            retry_after: Duration::from_secs(15 * 60),
        }
    }
}

impl SyncPolicy {
    /// Whether a refresh is due given the last successful sync (epoch millis)
    pub fn is_stale(&self, last_sync_at: Option<i64>, now: i64) -> bool {
        let Some(last) = last_sync_at else {
            return true;
        };
        let threshold = i64::try_from(self.stale_after.as_millis()).unwrap_or(i64::MAX);
        now.saturating_sub(last) > threshold
    }
}

/// What the scheduler should do after a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Retry,
}

impl JobOutcome {
    pub fn of(result: &Result<SyncReport, SyncError>) -> Self {
        match result {
            Ok(report) if !report.is_complete_failure() => Self::Success,
            _ => Self::Retry,
        }
    }
}

/// Drives periodic refreshes and download expiry
pub struct Scheduler<C: HttpClient + 'static> {
    sync: Arc<SyncEngine<C>>,
    downloads: DownloadManager<C>,
    policy: SyncPolicy,
}

impl<C: HttpClient + 'static> Scheduler<C> {
    pub fn new(sync: Arc<SyncEngine<C>>, downloads: DownloadManager<C>, policy: SyncPolicy) -> Self {
        Self {
            sync,
            downloads,
            policy,
        }
    }

    /// Refresh everything and classify the result
    pub async fn run_sync_job(&self) -> JobOutcome {
        let result = self.sync.refresh_all().await;
        if let Err(e) = &result {
            warn!(error = %e, "Sync job failed");
        }
        JobOutcome::of(&result)
    }

    /// Refresh only when the last sync is stale; `None` when nothing was due
    pub async fn sync_if_stale(&self) -> Option<JobOutcome> {
        let last_sync_at = match self.sync.store().last_sync_at().await {
            Ok(last) => last,
            Err(e) => {
                warn!(error = %e, "Could not read last sync time");
                None
            }
        };

        if self.policy.is_stale(last_sync_at, now_millis()) {
            Some(self.run_sync_job().await)
        } else {
            debug!(?last_sync_at, "Subscriptions are fresh");
            None
        }
    }

    /// Reclaim finished downloads past their retention
    pub async fn expire_downloads(&self) -> usize {
        match self.downloads.expire_stale(now_millis()).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Download expiry failed");
                0
            }
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// The first pass refreshes only if stale; afterwards every pass
    /// refreshes, spaced by the periodic or retry interval.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(policy = ?self.policy, "Scheduler started");
        let mut force = false;

        loop {
            let outcome = if force {
                Some(self.run_sync_job().await)
            } else {
                self.sync_if_stale().await
            };
            self.expire_downloads().await;

            let delay = match outcome {
                Some(JobOutcome::Retry) => self.policy.retry_after,
                _ => self.policy.periodic_interval,
            };
            debug!(?outcome, ?delay, "Next scheduler pass");

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => force = true,
            }
        }
        info!("Scheduler stopped");
    }
}
