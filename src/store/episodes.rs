use sqlx::SqliteConnection;
use tracing::{debug, instrument};

use super::models::{Episode, Podcast, UserState, UserStateSnapshot};
use super::Store;
use crate::error::StoreError;

const EPISODE_COLUMNS: &str = "guid, podcast_url, title, description, pub_date, audio_url, \
     duration, progress_in_millis, local_file_path, finished_at";

/// Insert the podcast, or update title and image if the URL is already known.
///
/// `INSERT OR REPLACE` would delete the old row first and cascade to all of
/// its episodes.
async fn upsert_podcast_on(conn: &mut SqliteConnection, podcast: &Podcast) -> Result<(), StoreError> {
    let inserted = sqlx::query("INSERT OR IGNORE INTO podcasts (url, title, image_url) VALUES (?, ?, ?)")
        .bind(&podcast.url)
        .bind(&podcast.title)
        .bind(&podcast.image_url)
        .execute(&mut *conn)
        .await?;

    if inserted.rows_affected() == 0 {
        sqlx::query("UPDATE podcasts SET title = ?, image_url = ? WHERE url = ?")
            .bind(&podcast.title)
            .bind(&podcast.image_url)
            .bind(&podcast.url)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// Insert new episodes; for known guids rewrite only the feed-owned columns
async fn upsert_episodes_on(conn: &mut SqliteConnection, episodes: &[Episode]) -> Result<(), StoreError> {
    for episode in episodes {
        sqlx::query(
            r"INSERT INTO episodes (
                guid, podcast_url, title, description, pub_date, audio_url, duration,
                progress_in_millis, local_file_path, finished_at
              ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT(guid) DO UPDATE SET
                podcast_url = excluded.podcast_url,
                title = excluded.title,
                description = excluded.description,
                pub_date = excluded.pub_date,
                audio_url = excluded.audio_url,
                duration = excluded.duration",
        )
        .bind(&episode.guid)
        .bind(&episode.podcast_url)
        .bind(&episode.title)
        .bind(&episode.description)
        .bind(episode.pub_date)
        .bind(&episode.audio_url)
        .bind(episode.duration)
        .bind(episode.progress_in_millis)
        .bind(&episode.local_file_path)
        .bind(episode.finished_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

impl Store {
    /// Insert or update a podcast without touching its episodes
    pub async fn upsert_podcast(&self, podcast: &Podcast) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        upsert_podcast_on(&mut conn, podcast).await
    }

    /// Upsert a batch of episodes in one transaction
    pub async fn upsert_episodes(&self, episodes: &[Episode]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        upsert_episodes_on(&mut tx, episodes).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Write one refreshed feed: the podcast row and all of its episodes
    #[instrument(skip(self, podcast, episodes), fields(podcast = %podcast.url, episodes = episodes.len()))]
    pub async fn save_feed(&self, podcast: &Podcast, episodes: &[Episode]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        upsert_podcast_on(&mut tx, podcast).await?;
        upsert_episodes_on(&mut tx, episodes).await?;
        tx.commit().await?;
        debug!("Feed saved");
        Ok(())
    }

    pub async fn podcast(&self, url: &str) -> Result<Option<Podcast>, StoreError> {
        let podcast = sqlx::query_as::<_, Podcast>("SELECT url, title, image_url FROM podcasts WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(podcast)
    }

    pub async fn podcasts(&self) -> Result<Vec<Podcast>, StoreError> {
        let podcasts = sqlx::query_as::<_, Podcast>("SELECT url, title, image_url FROM podcasts ORDER BY title")
            .fetch_all(&self.pool)
            .await?;
        Ok(podcasts)
    }

    /// Delete a podcast; its episodes go with it
    pub async fn delete_podcast(&self, url: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM podcasts WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn episode(&self, guid: &str) -> Result<Option<Episode>, StoreError> {
        let sql = format!("SELECT {EPISODE_COLUMNS} FROM episodes WHERE guid = ?");
        let episode = sqlx::query_as::<_, Episode>(&sql)
            .bind(guid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(episode)
    }

    /// All episodes, newest first
    pub async fn episodes(&self) -> Result<Vec<Episode>, StoreError> {
        let sql = format!("SELECT {EPISODE_COLUMNS} FROM episodes ORDER BY pub_date DESC, guid");
        let episodes = sqlx::query_as::<_, Episode>(&sql).fetch_all(&self.pool).await?;
        Ok(episodes)
    }

    /// Episodes of one podcast, newest first
    pub async fn episodes_for_podcast(&self, podcast_url: &str) -> Result<Vec<Episode>, StoreError> {
        let sql = format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes WHERE podcast_url = ? ORDER BY pub_date DESC, guid"
        );
        let episodes = sqlx::query_as::<_, Episode>(&sql)
            .bind(podcast_url)
            .fetch_all(&self.pool)
            .await?;
        Ok(episodes)
    }

    pub async fn episode_count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM episodes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Read the user-owned fields of every episode in a single query
    pub async fn user_state_snapshot(&self) -> Result<UserStateSnapshot, StoreError> {
        let rows: Vec<(String, i64, Option<i64>, Option<String>, i64)> = sqlx::query_as(
            "SELECT guid, progress_in_millis, finished_at, local_file_path, pub_date FROM episodes",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(guid, progress_in_millis, finished_at, local_file_path, pub_date)| {
                (
                    guid,
                    UserState {
                        progress_in_millis,
                        finished_at,
                        local_file_path,
                        pub_date,
                    },
                )
            })
            .collect())
    }

    pub async fn save_progress(&self, guid: &str, progress_in_millis: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE episodes SET progress_in_millis = ? WHERE guid = ?")
            .bind(progress_in_millis)
            .bind(guid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a completed download
    ///
    /// Fails with [`StoreError::EpisodeNotFound`] if the row no longer exists.
    pub async fn set_local_file(&self, guid: &str, path: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE episodes SET local_file_path = ? WHERE guid = ?")
            .bind(path)
            .bind(guid)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::EpisodeNotFound {
                guid: guid.to_string(),
            });
        }
        Ok(())
    }

    pub async fn clear_local_file(&self, guid: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE episodes SET local_file_path = NULL WHERE guid = ?")
            .bind(guid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark an episode finished at `finished_at`
    ///
    /// Progress is set to `progress_in_millis` when given, otherwise to the
    /// full duration.
    pub async fn mark_finished(
        &self,
        guid: &str,
        progress_in_millis: Option<i64>,
        finished_at: i64,
    ) -> Result<Episode, StoreError> {
        let result = sqlx::query(
            r"UPDATE episodes
              SET progress_in_millis = COALESCE(?, duration * 1000),
                  finished_at = ?
              WHERE guid = ?",
        )
        .bind(progress_in_millis)
        .bind(finished_at)
        .bind(guid)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::EpisodeNotFound {
                guid: guid.to_string(),
            });
        }

        self.episode(guid)
            .await?
            .ok_or_else(|| StoreError::EpisodeNotFound {
                guid: guid.to_string(),
            })
    }

    /// Finished episodes whose download is older than `cutoff`
    pub async fn expired_downloads(&self, cutoff: i64) -> Result<Vec<Episode>, StoreError> {
        let sql = format!(
            r"SELECT {EPISODE_COLUMNS} FROM episodes
              WHERE local_file_path IS NOT NULL
                AND finished_at IS NOT NULL
                AND finished_at < ?
              ORDER BY finished_at"
        );
        let episodes = sqlx::query_as::<_, Episode>(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        Ok(episodes)
    }
}
