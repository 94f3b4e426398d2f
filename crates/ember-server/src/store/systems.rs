//! Machine rows and the conditional updates backing the state engine.

use super::mac::normalize_mac;
use super::{Result, Store, StoreError};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// A machine as persisted
#[derive(Debug, Clone, Serialize)]
pub struct System {
    pub id: i64,
    pub mac: String,
    pub hostname: String,
    pub image_id: Option<i64>,
    pub profile_id: Option<i64>,
    /// JSON object mapping string→string
    pub vars: String,
    pub ip_addr: String,
    pub last_seen_at: String,
    pub state: String,
    pub state_changed_at: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Outcome of a conditional state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The row changed state; an event should fire
    Applied,
    /// The row was already in the target state; succeed silently
    AlreadyInTarget,
}

const SYSTEM_COLUMNS: &str = "id, mac, hostname, image_id, profile_id, vars, \
     ip_addr, COALESCE(last_seen_at, '') AS last_seen_at, \
     state, COALESCE(state_changed_at, '') AS state_changed_at, \
     created_at, updated_at";

fn scan_system(row: &SqliteRow) -> System {
    System {
        id: row.get("id"),
        mac: row.get("mac"),
        hostname: row.get("hostname"),
        image_id: row.get("image_id"),
        profile_id: row.get("profile_id"),
        vars: row.get("vars"),
        ip_addr: row.get("ip_addr"),
        last_seen_at: row.get("last_seen_at"),
        state: row.get("state"),
        state_changed_at: row.get("state_changed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl Store {
    pub async fn list_systems(&self) -> Result<Vec<System>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM systems ORDER BY id DESC",
            SYSTEM_COLUMNS
        ))
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(scan_system).collect())
    }

    pub async fn get_system(&self, id: i64) -> Result<Option<System>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM systems WHERE id = ?",
            SYSTEM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.as_ref().map(scan_system))
    }

    pub async fn get_system_by_mac(&self, mac: &str) -> Result<Option<System>> {
        let mac = normalize_mac(mac)?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM systems WHERE mac = ?",
            SYSTEM_COLUMNS
        ))
        .bind(&mac)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.as_ref().map(scan_system))
    }

    /// Operator-created machine
    pub async fn create_system(&self, mac: &str, hostname: &str) -> Result<System> {
        let mac = normalize_mac(mac)?;
        sqlx::query("INSERT INTO systems (mac, hostname) VALUES (?, ?)")
            .bind(&mac)
            .bind(hostname)
            .execute(self.pool())
            .await?;

        self.get_system_by_mac(&mac)
            .await?
            .ok_or(StoreError::NotFound("system"))
    }

    /// First contact from an unknown MAC creates a `discovered` row;
    /// a known MAC just gets its IP and last-seen refreshed.
    ///
    /// INSERT OR IGNORE makes the create race-safe: two interfaces
    /// discovering the same MAC concurrently produce one row, and only
    /// the caller whose insert landed sees `is_new = true` (so exactly
    /// one `discovered` event fires).
    pub async fn auto_register(&self, mac: &str, ip_addr: &str) -> Result<(System, bool)> {
        let mac = normalize_mac(mac)?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO systems (mac, ip_addr, last_seen_at) \
             VALUES (?, ?, datetime('now'))",
        )
        .bind(&mac)
        .bind(ip_addr)
        .execute(self.pool())
        .await?;

        let is_new = result.rows_affected() > 0;
        if !is_new {
            self.touch_system(&mac, ip_addr).await?;
        }

        let sys = self
            .get_system_by_mac(&mac)
            .await?
            .ok_or(StoreError::NotFound("system"))?;
        Ok((sys, is_new))
    }

    /// Refresh observed IP and last-seen on every boot contact
    pub async fn touch_system(&self, mac: &str, ip_addr: &str) -> Result<()> {
        let mac = normalize_mac(mac)?;
        sqlx::query(
            "UPDATE systems SET ip_addr = ?, last_seen_at = datetime('now'), \
             updated_at = datetime('now') WHERE mac = ?",
        )
        .bind(ip_addr)
        .bind(&mac)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn update_system_info(&self, id: i64, mac: &str, hostname: &str) -> Result<()> {
        let mac = normalize_mac(mac)?;
        sqlx::query(
            "UPDATE systems SET mac = ?, hostname = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(&mac)
        .bind(hostname)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn update_system_image(&self, id: i64, image_id: Option<i64>) -> Result<()> {
        sqlx::query("UPDATE systems SET image_id = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(image_id)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn update_system_profile(&self, id: i64, profile_id: Option<i64>) -> Result<()> {
        sqlx::query("UPDATE systems SET profile_id = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(profile_id)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn update_system_vars(&self, id: i64, vars: &str) -> Result<()> {
        let vars = if vars.is_empty() { "{}" } else { vars };
        sqlx::query("UPDATE systems SET vars = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(vars)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Unconditional state write (operator actions, already guarded)
    pub async fn update_system_state(&self, id: i64, state: &str) -> Result<()> {
        sqlx::query(
            "UPDATE systems SET state = ?, state_changed_at = datetime('now'), \
             updated_at = datetime('now') WHERE id = ?",
        )
        .bind(state)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Compare-and-set state transition keyed by MAC.
    ///
    /// Zero affected rows gets reconciled with a follow-up read: already
    /// in the target state is success (idempotent callbacks), anything
    /// else surfaces the expected/actual pair.
    pub async fn transition_system_state(
        &self,
        mac: &str,
        expected: &str,
        new_state: &str,
    ) -> Result<Transition> {
        let mac = normalize_mac(mac)?;
        let result = sqlx::query(
            "UPDATE systems SET state = ?, state_changed_at = datetime('now'), \
             updated_at = datetime('now') WHERE mac = ? AND state = ?",
        )
        .bind(new_state)
        .bind(&mac)
        .bind(expected)
        .execute(self.pool())
        .await?;

        if result.rows_affected() > 0 {
            return Ok(Transition::Applied);
        }

        let current = self
            .get_system_by_mac(&mac)
            .await?
            .ok_or(StoreError::NotFound("system"))?;
        if current.state == new_state {
            Ok(Transition::AlreadyInTarget)
        } else {
            Err(StoreError::TransitionConflict {
                expected: expected.to_string(),
                actual: current.state,
            })
        }
    }

    pub async fn delete_system(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM systems WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[tokio::test]
    async fn test_create_and_lookup() {
        let store = Store::open_in_memory().await.unwrap();
        let sys = store.create_system("AA-BB-CC-DD-EE-FF", "node01").await.unwrap();

        assert_eq!(sys.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(sys.hostname, "node01");
        assert_eq!(sys.state, "discovered");
        assert!(sys.image_id.is_none());
        assert!(sys.profile_id.is_none());
        assert_eq!(sys.vars, "{}");

        // Lookup is normalised too
        let found = store.get_system_by_mac("aa:BB:cc:DD:ee:FF").await.unwrap();
        assert_eq!(found.unwrap().id, sys.id);
    }

    #[tokio::test]
    async fn test_mac_is_unique() {
        let store = Store::open_in_memory().await.unwrap();
        store.create_system("aa:bb:cc:dd:ee:ff", "a").await.unwrap();
        assert!(store.create_system("AA:BB:CC:DD:EE:FF", "b").await.is_err());
    }

    #[tokio::test]
    async fn test_auto_register_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();

        let (first, is_new) = store.auto_register("aa-bb-cc-dd-ee-ff", "10.0.0.7").await.unwrap();
        assert!(is_new);
        assert_eq!(first.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(first.ip_addr, "10.0.0.7");
        assert_eq!(first.state, "discovered");
        assert!(!first.last_seen_at.is_empty());

        // Repeats only touch; exactly one row, is_new never again
        for _ in 0..3 {
            let (again, is_new) = store.auto_register("aa:bb:cc:dd:ee:ff", "10.0.0.8").await.unwrap();
            assert!(!is_new);
            assert_eq!(again.id, first.id);
            assert_eq!(again.ip_addr, "10.0.0.8");
        }
        assert_eq!(store.list_systems().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conditional_transition() {
        let store = Store::open_in_memory().await.unwrap();
        let sys = store.create_system("aa:bb:cc:dd:ee:ff", "n1").await.unwrap();
        store.update_system_state(sys.id, "provisioning").await.unwrap();

        // provisioning → ready applies once
        let t = store
            .transition_system_state("aa:bb:cc:dd:ee:ff", "provisioning", "ready")
            .await
            .unwrap();
        assert_eq!(t, Transition::Applied);

        // Second identical callback succeeds without applying
        let t = store
            .transition_system_state("aa:bb:cc:dd:ee:ff", "provisioning", "ready")
            .await
            .unwrap();
        assert_eq!(t, Transition::AlreadyInTarget);

        // From the wrong state the conflict names both states
        let err = store
            .transition_system_state("aa:bb:cc:dd:ee:ff", "provisioning", "failed")
            .await
            .unwrap_err();
        match err {
            StoreError::TransitionConflict { expected, actual } => {
                assert_eq!(expected, "provisioning");
                assert_eq!(actual, "ready");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_transition_unknown_mac() {
        let store = Store::open_in_memory().await.unwrap();
        let err = store
            .transition_system_state("aa:bb:cc:dd:ee:00", "queued", "provisioning")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_nullable_assignments() {
        let store = Store::open_in_memory().await.unwrap();
        let sys = store.create_system("aa:bb:cc:dd:ee:ff", "n1").await.unwrap();
        let img = store
            .create_image("ubuntu", "", "linux", "vmlinuz, initrd.img", "quiet", "")
            .await
            .unwrap();

        store.update_system_image(sys.id, Some(img)).await.unwrap();
        let sys = store.get_system(sys.id).await.unwrap().unwrap();
        assert_eq!(sys.image_id, Some(img));

        store.update_system_image(sys.id, None).await.unwrap();
        let sys = store.get_system(sys.id).await.unwrap().unwrap();
        assert!(sys.image_id.is_none());
    }

    #[tokio::test]
    async fn test_image_delete_nulls_reference() {
        let store = Store::open_in_memory().await.unwrap();
        let sys = store.create_system("aa:bb:cc:dd:ee:ff", "n1").await.unwrap();
        let img = store
            .create_image("ubuntu", "", "linux", "", "", "")
            .await
            .unwrap();
        store.update_system_image(sys.id, Some(img)).await.unwrap();

        store.delete_image(img).await.unwrap();
        let sys = store.get_system(sys.id).await.unwrap().unwrap();
        assert!(sys.image_id.is_none());
    }
}
