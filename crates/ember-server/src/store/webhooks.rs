//! Webhook sink rows.

use super::{Result, Store};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// A webhook sink as persisted
#[derive(Debug, Clone, Serialize)]
pub struct Webhook {
    pub id: i64,
    pub url: String,
    /// Shared secret for the delivery signature; may be empty
    #[serde(skip_serializing)]
    pub secret: String,
    /// `*` or a comma-separated event-type list
    pub events: String,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

const WEBHOOK_COLUMNS: &str = "id, url, secret, events, enabled, created_at, updated_at";

fn scan_webhook(row: &SqliteRow) -> Webhook {
    Webhook {
        id: row.get("id"),
        url: row.get("url"),
        secret: row.get("secret"),
        events: row.get("events"),
        enabled: row.get::<i64, _>("enabled") != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl Store {
    pub async fn list_webhooks(&self) -> Result<Vec<Webhook>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM webhooks ORDER BY id DESC",
            WEBHOOK_COLUMNS
        ))
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(scan_webhook).collect())
    }

    /// Sinks that receive deliveries, in stable id order (FIFO per sink)
    pub async fn list_enabled_webhooks(&self) -> Result<Vec<Webhook>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM webhooks WHERE enabled = 1 ORDER BY id",
            WEBHOOK_COLUMNS
        ))
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(scan_webhook).collect())
    }

    pub async fn get_webhook(&self, id: i64) -> Result<Option<Webhook>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM webhooks WHERE id = ?",
            WEBHOOK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.as_ref().map(scan_webhook))
    }

    pub async fn create_webhook(&self, url: &str, secret: &str, events: &str) -> Result<i64> {
        let events = if events.is_empty() { "*" } else { events };
        let result = sqlx::query("INSERT INTO webhooks (url, secret, events) VALUES (?, ?, ?)")
            .bind(url)
            .bind(secret)
            .bind(events)
            .execute(self.pool())
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn set_webhook_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE webhooks SET enabled = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(enabled as i64)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn delete_webhook(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM webhooks WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::store::Store;

    #[tokio::test]
    async fn test_webhook_crud_and_enabled_filter() {
        let store = Store::open_in_memory().await.unwrap();
        let a = store
            .create_webhook("https://hooks.example/a", "s3cret", "")
            .await
            .unwrap();
        let b = store
            .create_webhook("https://hooks.example/b", "", "system.ready,system.failed")
            .await
            .unwrap();

        let wh = store.get_webhook(a).await.unwrap().unwrap();
        assert_eq!(wh.events, "*"); // empty filter widens to everything
        assert!(wh.enabled);

        store.set_webhook_enabled(b, false).await.unwrap();
        let enabled = store.list_enabled_webhooks().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, a);

        store.delete_webhook(a).await.unwrap();
        assert!(store.get_webhook(a).await.unwrap().is_none());
    }
}
