//! Image rows: operator uploads and catalog pulls.

use super::{Result, Store};
use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Image download status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    Ready,
    Downloading,
    Error,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Ready => "ready",
            ImageStatus::Downloading => "downloading",
            ImageStatus::Error => "error",
        }
    }
}

/// A downloading image with no progress for this long is dead
const STALE_DOWNLOAD_MINUTES: i64 = 35;

/// An image as persisted
#[derive(Debug, Clone, Serialize)]
pub struct Image {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub boot_flavor: String,
    /// Informational list of file names held under `images/<id>/`
    pub file_list: String,
    pub cmdline: String,
    pub ipxe_script: String,
    pub status: String,
    pub status_detail: String,
    pub catalog_id: String,
    pub catalog_hash: String,
    pub icon: String,
    pub icon_color: String,
    pub created_at: String,
    pub updated_at: String,
}

const IMAGE_COLUMNS: &str = "id, name, description, boot_flavor, file_list, cmdline, \
     ipxe_script, status, status_detail, catalog_id, catalog_hash, icon, icon_color, \
     created_at, updated_at";

fn scan_image(row: &SqliteRow) -> Image {
    Image {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        boot_flavor: row.get("boot_flavor"),
        file_list: row.get("file_list"),
        cmdline: row.get("cmdline"),
        ipxe_script: row.get("ipxe_script"),
        status: row.get("status"),
        status_detail: row.get("status_detail"),
        catalog_id: row.get("catalog_id"),
        catalog_hash: row.get("catalog_hash"),
        icon: row.get("icon"),
        icon_color: row.get("icon_color"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl Store {
    pub async fn list_images(&self) -> Result<Vec<Image>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM images ORDER BY id DESC",
            IMAGE_COLUMNS
        ))
        .fetch_all(self.pool())
        .await?;
        let mut images: Vec<Image> = rows.iter().map(scan_image).collect();
        for img in &mut images {
            self.promote_stale_download(img).await?;
        }
        Ok(images)
    }

    pub async fn get_image(&self, id: i64) -> Result<Option<Image>> {
        let row = sqlx::query(&format!("SELECT {} FROM images WHERE id = ?", IMAGE_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        let mut img = row.as_ref().map(scan_image);
        if let Some(ref mut img) = img {
            self.promote_stale_download(img).await?;
        }
        Ok(img)
    }

    pub async fn get_image_by_catalog_id(&self, catalog_id: &str) -> Result<Option<Image>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM images WHERE catalog_id = ?",
            IMAGE_COLUMNS
        ))
        .bind(catalog_id)
        .fetch_optional(self.pool())
        .await?;
        let mut img = row.as_ref().map(scan_image);
        if let Some(ref mut img) = img {
            self.promote_stale_download(img).await?;
        }
        Ok(img)
    }

    /// A `downloading` image whose last update is older than 35 minutes
    /// lost its downloader (crash, kill); flip it to error on read.
    async fn promote_stale_download(&self, img: &mut Image) -> Result<()> {
        if img.status != ImageStatus::Downloading.as_str() {
            return Ok(());
        }
        let Ok(updated) = NaiveDateTime::parse_from_str(&img.updated_at, "%Y-%m-%d %H:%M:%S")
        else {
            return Ok(());
        };
        let age = Utc::now().naive_utc() - updated;
        if age.num_minutes() > STALE_DOWNLOAD_MINUTES {
            self.update_image_status(img.id, ImageStatus::Error, "Download timed out")
                .await?;
            img.status = ImageStatus::Error.as_str().to_string();
            img.status_detail = "Download timed out".to_string();
        }
        Ok(())
    }

    /// Operator-uploaded image, ready immediately
    pub async fn create_image(
        &self,
        name: &str,
        description: &str,
        boot_flavor: &str,
        file_list: &str,
        cmdline: &str,
        ipxe_script: &str,
    ) -> Result<i64> {
        let boot_flavor = if boot_flavor.is_empty() { "linux" } else { boot_flavor };
        let result = sqlx::query(
            "INSERT INTO images (name, description, boot_flavor, file_list, cmdline, ipxe_script) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(boot_flavor)
        .bind(file_list)
        .bind(cmdline)
        .bind(ipxe_script)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Catalog-pulled image, created in `downloading`
    #[allow(clippy::too_many_arguments)]
    pub async fn create_catalog_image(
        &self,
        name: &str,
        description: &str,
        boot_flavor: &str,
        cmdline: &str,
        ipxe_script: &str,
        catalog_id: &str,
        catalog_hash: &str,
        icon: &str,
        icon_color: &str,
    ) -> Result<i64> {
        let boot_flavor = if boot_flavor.is_empty() { "linux" } else { boot_flavor };
        let result = sqlx::query(
            "INSERT INTO images (name, description, boot_flavor, file_list, cmdline, ipxe_script, \
             status, catalog_id, catalog_hash, icon, icon_color) \
             VALUES (?, ?, ?, '', ?, ?, 'downloading', ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(boot_flavor)
        .bind(cmdline)
        .bind(ipxe_script)
        .bind(catalog_id)
        .bind(catalog_hash)
        .bind(icon)
        .bind(icon_color)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Forced re-pull: reset the row in place so the image keeps its id
    /// (and with it every machine assignment pointing at it)
    #[allow(clippy::too_many_arguments)]
    pub async fn reset_catalog_image(
        &self,
        id: i64,
        name: &str,
        description: &str,
        boot_flavor: &str,
        cmdline: &str,
        ipxe_script: &str,
        catalog_hash: &str,
        icon: &str,
        icon_color: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE images SET name = ?, description = ?, boot_flavor = ?, cmdline = ?, \
             ipxe_script = ?, file_list = '', status = 'downloading', status_detail = '', \
             catalog_hash = ?, icon = ?, icon_color = ?, updated_at = datetime('now') \
             WHERE id = ?",
        )
        .bind(name)
        .bind(description)
        .bind(boot_flavor)
        .bind(cmdline)
        .bind(ipxe_script)
        .bind(catalog_hash)
        .bind(icon)
        .bind(icon_color)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn update_image(
        &self,
        id: i64,
        name: &str,
        description: &str,
        boot_flavor: &str,
        cmdline: &str,
        ipxe_script: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE images SET name = ?, description = ?, boot_flavor = ?, cmdline = ?, \
             ipxe_script = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(name)
        .bind(description)
        .bind(boot_flavor)
        .bind(cmdline)
        .bind(ipxe_script)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn update_image_status(
        &self,
        id: i64,
        status: ImageStatus,
        detail: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE images SET status = ?, status_detail = ?, updated_at = datetime('now') \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(detail)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn update_image_files(&self, id: i64, file_list: &str) -> Result<()> {
        sqlx::query("UPDATE images SET file_list = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(file_list)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn update_image_icon(&self, id: i64, icon: &str, icon_color: &str) -> Result<()> {
        sqlx::query(
            "UPDATE images SET icon = ?, icon_color = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(icon)
        .bind(icon_color)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_image(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM images WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
