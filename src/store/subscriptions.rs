use tracing::instrument;

use super::models::Subscription;
use super::Store;
use crate::error::StoreError;

impl Store {
    /// Add a subscription; returns `false` if the URL was already subscribed
    pub async fn subscribe(&self, subscription: &Subscription) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO subscriptions (url, title, date_added) VALUES (?, ?, ?)",
        )
        .bind(&subscription.url)
        .bind(&subscription.title)
        .bind(subscription.date_added)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Add many subscriptions in one transaction, skipping known URLs
    ///
    /// Returns the number actually inserted.
    pub async fn insert_subscriptions(&self, subscriptions: &[Subscription]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for subscription in subscriptions {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO subscriptions (url, title, date_added) VALUES (?, ?, ?)",
            )
            .bind(&subscription.url)
            .bind(&subscription.title)
            .bind(subscription.date_added)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Remove a subscription together with its podcast and episodes
    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, url: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM subscriptions WHERE url = ?")
            .bind(url)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM podcasts WHERE url = ?")
            .bind(url)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(removed.rows_affected() > 0)
    }

    pub async fn subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            "SELECT url, title, date_added FROM subscriptions ORDER BY date_added, url",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(subscriptions)
    }

    pub async fn subscribed_urls(&self) -> Result<Vec<String>, StoreError> {
        let urls: Vec<(String,)> =
            sqlx::query_as("SELECT url FROM subscriptions ORDER BY date_added, url")
                .fetch_all(&self.pool)
                .await?;
        Ok(urls.into_iter().map(|(url,)| url).collect())
    }

    pub async fn subscription_count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subscriptions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{make_episode, make_podcast};

    fn subscription(url: &str, date_added: i64) -> Subscription {
        Subscription {
            url: url.to_string(),
            title: None,
            date_added,
        }
    }

    #[tokio::test]
    async fn subscribe_ignores_duplicates() {
        let store = Store::open_in_memory().await.unwrap();

        assert!(store.subscribe(&subscription("https://a.example.com", 1)).await.unwrap());
        assert!(!store.subscribe(&subscription("https://a.example.com", 2)).await.unwrap());

        let subs = store.subscriptions().await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].date_added, 1);
    }

    #[tokio::test]
    async fn insert_subscriptions_counts_new_rows() {
        let store = Store::open_in_memory().await.unwrap();
        store.subscribe(&subscription("https://a.example.com", 1)).await.unwrap();

        let inserted = store
            .insert_subscriptions(&[
                subscription("https://a.example.com", 2),
                subscription("https://b.example.com", 3),
            ])
            .await
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(
            store.subscribed_urls().await.unwrap(),
            vec!["https://a.example.com", "https://b.example.com"]
        );
    }

    #[tokio::test]
    async fn unsubscribe_removes_podcast_and_episodes() {
        let store = Store::open_in_memory().await.unwrap();
        let url = "https://example.com/feed.xml";
        store.subscribe(&subscription(url, 1)).await.unwrap();
        let podcast = make_podcast(url, "Show");
        store.save_feed(&podcast, &[make_episode("g1", url, 0)]).await.unwrap();

        assert!(store.unsubscribe(url).await.unwrap());

        assert_eq!(store.subscription_count().await.unwrap(), 0);
        assert!(store.podcast(url).await.unwrap().is_none());
        assert!(store.episode("g1").await.unwrap().is_none());
    }
}
