//! Key/value settings.
//!
//! Reserved keys: `password_hash`, `session_key` (hex signing key shared
//! by session cookies and URL tokens), `confirm_reimage` ("0"/"1").

use super::{Result, Store};
use sqlx::Row;

/// Setting key holding the operator password hash
pub const KEY_PASSWORD_HASH: &str = "password_hash";
/// Setting key holding the hex-encoded signing key
pub const KEY_SESSION_KEY: &str = "session_key";
/// Setting key for the global reimage confirmation menu
pub const KEY_CONFIRM_REIMAGE: &str = "confirm_reimage";

impl Store {
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_setting(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
