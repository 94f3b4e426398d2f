//! Profile rows: templated installer configuration applied per machine.

use super::{Result, Store};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// A profile as persisted. Profiles are image-agnostic: any profile can
/// be assigned to any machine and its templates receive machine + image
/// + URL context at render time.
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub os_family: String,
    pub config_template: String,
    pub kernel_params: String,
    /// JSON object mapping string→string
    pub default_vars: String,
    pub overlay_file: String,
    /// JSON-encoded variable definition list
    pub var_schema: String,
    pub catalog_id: String,
    pub created_at: String,
    pub updated_at: String,
}

const PROFILE_COLUMNS: &str = "id, name, description, os_family, config_template, \
     kernel_params, default_vars, overlay_file, var_schema, catalog_id, created_at, updated_at";

fn scan_profile(row: &SqliteRow) -> Profile {
    Profile {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        os_family: row.get("os_family"),
        config_template: row.get("config_template"),
        kernel_params: row.get("kernel_params"),
        default_vars: row.get("default_vars"),
        overlay_file: row.get("overlay_file"),
        var_schema: row.get("var_schema"),
        catalog_id: row.get("catalog_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl Store {
    pub async fn list_profiles(&self) -> Result<Vec<Profile>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM profiles ORDER BY id DESC",
            PROFILE_COLUMNS
        ))
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(scan_profile).collect())
    }

    pub async fn get_profile(&self, id: i64) -> Result<Option<Profile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM profiles WHERE id = ?",
            PROFILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.as_ref().map(scan_profile))
    }

    pub async fn get_profile_by_catalog_id(&self, catalog_id: &str) -> Result<Option<Profile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM profiles WHERE catalog_id = ?",
            PROFILE_COLUMNS
        ))
        .bind(catalog_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.as_ref().map(scan_profile))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_profile(
        &self,
        name: &str,
        description: &str,
        os_family: &str,
        config_template: &str,
        kernel_params: &str,
        default_vars: &str,
        overlay_file: &str,
        var_schema: &str,
        catalog_id: &str,
    ) -> Result<i64> {
        let os_family = if os_family.is_empty() { "custom" } else { os_family };
        let default_vars = if default_vars.is_empty() { "{}" } else { default_vars };
        let result = sqlx::query(
            "INSERT INTO profiles (name, description, os_family, config_template, kernel_params, \
             default_vars, overlay_file, var_schema, catalog_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(os_family)
        .bind(config_template)
        .bind(kernel_params)
        .bind(default_vars)
        .bind(overlay_file)
        .bind(var_schema)
        .bind(catalog_id)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update_profile(
        &self,
        id: i64,
        name: &str,
        description: &str,
        os_family: &str,
        config_template: &str,
        kernel_params: &str,
        default_vars: &str,
        overlay_file: &str,
        var_schema: &str,
    ) -> Result<()> {
        let os_family = if os_family.is_empty() { "custom" } else { os_family };
        let default_vars = if default_vars.is_empty() { "{}" } else { default_vars };
        sqlx::query(
            "UPDATE profiles SET name = ?, description = ?, os_family = ?, config_template = ?, \
             kernel_params = ?, default_vars = ?, overlay_file = ?, var_schema = ?, \
             updated_at = datetime('now') WHERE id = ?",
        )
        .bind(name)
        .bind(description)
        .bind(os_family)
        .bind(config_template)
        .bind(kernel_params)
        .bind(default_vars)
        .bind(overlay_file)
        .bind(var_schema)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_profile(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM profiles WHERE id = ?")
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
    async fn test_profile_crud() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store
            .create_profile(
                "Ubuntu Autoinstall",
                "cloud-init",
                "debian",
                "#cloud-config\nhostname: {{ Hostname }}\n",
                "autoinstall ds=nocloud",
                r#"{"tz":"UTC"}"#,
                "site.img",
                "",
                "",
            )
            .await
            .unwrap();

        let p = store.get_profile(id).await.unwrap().unwrap();
        assert_eq!(p.name, "Ubuntu Autoinstall");
        assert_eq!(p.os_family, "debian");
        assert_eq!(p.overlay_file, "site.img");

        store
            .update_profile(id, "Ubuntu", "", "", "", "", "", "", "")
            .await
            .unwrap();
        let p = store.get_profile(id).await.unwrap().unwrap();
        assert_eq!(p.name, "Ubuntu");
        // Empty inputs fall back to the defaults
        assert_eq!(p.os_family, "custom");
        assert_eq!(p.default_vars, "{}");

        store.delete_profile(id).await.unwrap();
        assert!(store.get_profile(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookup_by_catalog_id() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .create_profile("u24 Profile", "", "debian", "tpl", "params", "{}", "", "[]", "u24-server")
            .await
            .unwrap();

        let p = store.get_profile_by_catalog_id("u24-server").await.unwrap();
        assert!(p.is_some());
        assert!(store.get_profile_by_catalog_id("absent").await.unwrap().is_none());
    }
}
