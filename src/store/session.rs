use sqlx::SqliteConnection;

use super::models::SessionSnapshot;
use super::Store;
use crate::error::StoreError;

const SESSION_KEY: &str = "session_snapshot";
const LAST_SYNC_KEY: &str = "last_sync_at";

async fn put_on(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<(), StoreError> {
    sqlx::query(
        r"INSERT INTO kv_store (key, value) VALUES (?, ?)
          ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn encode_session(snapshot: &SessionSnapshot) -> Result<String, StoreError> {
    serde_json::to_string(snapshot).map_err(|source| StoreError::CorruptValue {
        key: SESSION_KEY.to_string(),
        source,
    })
}

impl Store {
    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.map(|(v,)| v))
    }

    pub async fn load_session(&self) -> Result<Option<SessionSnapshot>, StoreError> {
        let Some(raw) = self.get_value(SESSION_KEY).await? else {
            return Ok(None);
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::CorruptValue {
                key: SESSION_KEY.to_string(),
                source,
            })
    }

    pub async fn save_session(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let encoded = encode_session(snapshot)?;
        let mut conn = self.pool.acquire().await?;
        put_on(&mut conn, SESSION_KEY, &encoded).await
    }

    /// Persist a playback checkpoint
    ///
    /// Writes the episode's progress and the session snapshot in one
    /// transaction.
    pub async fn checkpoint(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let encoded = encode_session(snapshot)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE episodes SET progress_in_millis = ? WHERE guid = ?")
            .bind(snapshot.last_position_millis)
            .bind(&snapshot.last_guid)
            .execute(&mut *tx)
            .await?;
        put_on(&mut tx, SESSION_KEY, &encoded).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Epoch milliseconds of the last completed sync pass
    pub async fn last_sync_at(&self) -> Result<Option<i64>, StoreError> {
        Ok(self
            .get_value(LAST_SYNC_KEY)
            .await?
            .and_then(|raw| raw.parse().ok()))
    }

    pub async fn set_last_sync_at(&self, at: i64) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        put_on(&mut conn, LAST_SYNC_KEY, &at.to_string()).await
    }
}
