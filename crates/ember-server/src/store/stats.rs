//! Aggregate counts for the health endpoint.

use super::{Result, Store};
use serde::Serialize;
use sqlx::Row;

#[derive(Debug, Default, Clone, Serialize)]
pub struct Stats {
    pub systems: SystemStats,
    pub images: ImageStats,
    pub profiles: i64,
    pub webhooks: WebhookStats,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SystemStats {
    pub total: i64,
    pub discovered: i64,
    pub queued: i64,
    pub provisioning: i64,
    pub ready: i64,
    pub failed: i64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ImageStats {
    pub total: i64,
    pub ready: i64,
    pub downloading: i64,
    pub error: i64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct WebhookStats {
    pub total: i64,
    pub enabled: i64,
}

impl Store {
    pub async fn get_stats(&self) -> Result<Stats> {
        let mut stats = Stats::default();

        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM systems GROUP BY state")
            .fetch_all(self.pool())
            .await?;
        for row in rows {
            let state: String = row.get("state");
            let n: i64 = row.get("n");
            stats.systems.total += n;
            match state.as_str() {
                "discovered" => stats.systems.discovered = n,
                "queued" => stats.systems.queued = n,
                "provisioning" => stats.systems.provisioning = n,
                "ready" => stats.systems.ready = n,
                "failed" => stats.systems.failed = n,
                _ => {}
            }
        }

        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM images GROUP BY status")
            .fetch_all(self.pool())
            .await?;
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            stats.images.total += n;
            match status.as_str() {
                "ready" => stats.images.ready = n,
                "downloading" => stats.images.downloading = n,
                "error" => stats.images.error = n,
                _ => {}
            }
        }

        let row = sqlx::query("SELECT COUNT(*) AS n FROM profiles")
            .fetch_one(self.pool())
            .await?;
        stats.profiles = row.get("n");

        let row = sqlx::query("SELECT COUNT(*) AS n FROM webhooks")
            .fetch_one(self.pool())
            .await?;
        stats.webhooks.total = row.get("n");
        let row = sqlx::query("SELECT COUNT(*) AS n FROM webhooks WHERE enabled = 1")
            .fetch_one(self.pool())
            .await?;
        stats.webhooks.enabled = row.get("n");

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::Store;

    #[tokio::test]
    async fn test_stats_counts() {
        let store = Store::open_in_memory().await.unwrap();

        let a = store.create_system("aa:bb:cc:dd:ee:01", "a").await.unwrap();
        store.create_system("aa:bb:cc:dd:ee:02", "b").await.unwrap();
        store.update_system_state(a.id, "ready").await.unwrap();

        store.create_image("img", "", "linux", "", "", "").await.unwrap();
        store
            .create_profile("p", "", "", "", "", "", "", "", "")
            .await
            .unwrap();
        let wh = store.create_webhook("https://h/x", "", "*").await.unwrap();
        store.create_webhook("https://h/y", "", "*").await.unwrap();
        store.set_webhook_enabled(wh, false).await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.systems.total, 2);
        assert_eq!(stats.systems.discovered, 1);
        assert_eq!(stats.systems.ready, 1);
        assert_eq!(stats.images.total, 1);
        assert_eq!(stats.images.ready, 1);
        assert_eq!(stats.profiles, 1);
        assert_eq!(stats.webhooks.total, 2);
        assert_eq!(stats.webhooks.enabled, 1);
    }
}
