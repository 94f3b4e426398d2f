//! Catalog puller
//!
//! A catalog is a remote JSON manifest of image bundles. Pulling an entry
//! reconciles it against the local image table, then downloads its files
//! in a background task with throttled progress updates. Entries may
//! carry profile fields; the first pull auto-creates the matching
//! profile.

use crate::safenet::SafeClient;
use crate::store::{ImageStatus, Store};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

/// Manifest fetch timeout
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Total per-file download timeout
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Top-level manifest
#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub schema_version: i64,
    #[serde(default)]
    pub entries: Vec<Entry>,
}

/// One downloadable file of an entry
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogFile {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub sha256: String,
}

/// Variable definition carried by entries with profile data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarDef {
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub var_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// One catalog entry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Entry {
    pub id: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub icon_color: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub boot_type: String,
    #[serde(default)]
    pub cmdline: String,
    #[serde(default)]
    pub ipxe_script: String,
    #[serde(default)]
    pub files: Vec<CatalogFile>,
    #[serde(default)]
    pub os_family: String,
    #[serde(default)]
    pub kernel_params: String,
    #[serde(default)]
    pub config_template: String,
    #[serde(default)]
    pub vars: Vec<VarDef>,
}

impl Entry {
    /// Deterministic SHA-256 over the entry's content fields, NUL
    /// separated. The profile fields only join the hash when at least one
    /// is set, so manifests written before those fields existed keep
    /// their old hashes.
    pub fn content_hash(&self) -> String {
        let mut h = Sha256::new();
        for field in [
            &self.name,
            &self.description,
            &self.version,
            &self.arch,
            &self.boot_type,
            &self.cmdline,
            &self.ipxe_script,
        ] {
            h.update(field.as_bytes());
            h.update([0u8]);
        }

        let mut sorted: Vec<&CatalogFile> = self.files.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        for f in sorted {
            h.update(f.name.as_bytes());
            h.update([0u8]);
            h.update(f.url.as_bytes());
            h.update([0u8]);
        }

        if !self.os_family.is_empty()
            || !self.kernel_params.is_empty()
            || !self.config_template.is_empty()
            || !self.vars.is_empty()
        {
            for field in [&self.os_family, &self.kernel_params, &self.config_template] {
                h.update(field.as_bytes());
                h.update([0u8]);
            }
            for v in &self.vars {
                h.update(v.key.as_bytes());
                h.update([0u8]);
                h.update(v.default.as_bytes());
                h.update([0u8]);
            }
        }

        hex::encode(h.finalize())
    }
}

/// Profile fields distilled from an entry
#[derive(Debug, Clone)]
pub struct ProfileData {
    pub name: String,
    pub description: String,
    pub os_family: String,
    pub kernel_params: String,
    pub config_template: String,
    /// JSON object of var-def defaults
    pub default_vars: String,
    /// JSON-encoded var-def list
    pub var_schema: String,
}

/// Extract profile fields from an entry; None when the entry carries no
/// profile data.
pub fn profile_data_from_entry(entry: &Entry) -> Option<ProfileData> {
    if entry.config_template.is_empty() && entry.kernel_params.is_empty() {
        return None;
    }

    let os_family = if entry.os_family.is_empty() {
        "custom".to_string()
    } else {
        entry.os_family.clone()
    };

    // BTreeMap keeps the emitted JSON stable across runs
    let defaults: BTreeMap<&str, &str> = entry
        .vars
        .iter()
        .filter(|v| !v.default.is_empty())
        .map(|v| (v.key.as_str(), v.default.as_str()))
        .collect();
    let default_vars = if defaults.is_empty() {
        "{}".to_string()
    } else {
        serde_json::to_string(&defaults).unwrap_or_else(|_| "{}".to_string())
    };

    let var_schema = if entry.vars.is_empty() {
        String::new()
    } else {
        serde_json::to_string(&entry.vars).unwrap_or_default()
    };

    Some(ProfileData {
        name: format!("{} Profile", entry.name),
        description: format!("Auto-created from catalog: {}", entry.name),
        os_family,
        kernel_params: entry.kernel_params.clone(),
        config_template: entry.config_template.clone(),
        default_vars,
        var_schema,
    })
}

/// Error type for catalog operations
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("fetch catalog: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("catalog returned HTTP {0}")]
    FetchStatus(u16),

    #[error("an image pull for this entry is already downloading")]
    AlreadyDownloading,

    #[error("already pulled")]
    AlreadyPulled,

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

/// Fetch and parse the manifest
pub async fn fetch(catalog_url: &str) -> Result<Catalog, CatalogError> {
    let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
    let resp = client.get(catalog_url).send().await?;
    if !resp.status().is_success() {
        return Err(CatalogError::FetchStatus(resp.status().as_u16()));
    }
    Ok(resp.json().await?)
}

/// Reconcile an entry against the local table and kick off the download.
/// Returns the image id; the download continues in the background.
pub async fn pull(
    store: &Store,
    data_dir: &Path,
    entry: Entry,
    force: bool,
) -> Result<i64, CatalogError> {
    let hash = entry.content_hash();

    let existing = store.get_image_by_catalog_id(&entry.id).await?;
    if let Some(ref existing) = existing {
        if existing.status == ImageStatus::Downloading.as_str() {
            return Err(CatalogError::AlreadyDownloading);
        }
        if existing.status == ImageStatus::Ready.as_str() && !force {
            // Opportunistic icon refresh, nothing else changes
            if entry.icon != existing.icon || entry.icon_color != existing.icon_color {
                store
                    .update_image_icon(existing.id, &entry.icon, &entry.icon_color)
                    .await?;
            }
            return Err(CatalogError::AlreadyPulled);
        }
        if existing.status == ImageStatus::Error.as_str() {
            // Broken pull: wipe and start fresh
            let image_dir = image_dir(data_dir, existing.id);
            let _ = tokio::fs::remove_dir_all(&image_dir).await;
            store.delete_image(existing.id).await?;
        }
    }

    let id = match existing {
        Some(ref existing) if existing.status != ImageStatus::Error.as_str() => {
            // Forced re-pull: keep the id, reset the row and directory
            let id = existing.id;
            let _ = tokio::fs::remove_dir_all(image_dir(data_dir, id)).await;
            store
                .reset_catalog_image(
                    id,
                    &entry.name,
                    &entry.description,
                    &entry.boot_type,
                    &entry.cmdline,
                    &entry.ipxe_script,
                    &hash,
                    &entry.icon,
                    &entry.icon_color,
                )
                .await?;
            id
        }
        _ => {
            store
                .create_catalog_image(
                    &entry.name,
                    &entry.description,
                    &entry.boot_type,
                    &entry.cmdline,
                    &entry.ipxe_script,
                    &entry.id,
                    &hash,
                    &entry.icon,
                    &entry.icon_color,
                )
                .await?
        }
    };

    let store = store.clone();
    let dir = image_dir(data_dir, id);
    tokio::spawn(async move {
        download_entry(store, dir, id, entry).await;
    });

    Ok(id)
}

fn image_dir(data_dir: &Path, id: i64) -> PathBuf {
    data_dir.join("images").join(id.to_string())
}

/// The background download: files in sequence, progress at most once per
/// second and only on a changed percentage; the first failure marks the
/// image errored and stops.
async fn download_entry(store: Store, dir: PathBuf, id: i64, entry: Entry) {
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        let _ = store
            .update_image_status(id, ImageStatus::Error, &e.to_string())
            .await;
        return;
    }

    let client = SafeClient::new(DOWNLOAD_TIMEOUT);
    let total_files = entry.files.len();
    let mut downloaded = Vec::new();

    for (i, f) in entry.files.iter().enumerate() {
        info!(file = %f.name, image = %entry.name, "downloading");
        let _ = store
            .update_image_status(
                id,
                ImageStatus::Downloading,
                &format!("{}/{} {} 0%", i + 1, total_files, f.name),
            )
            .await;

        let safe_name = match Path::new(&f.name).file_name() {
            Some(n) => n.to_string_lossy().to_string(),
            None => {
                let _ = store
                    .update_image_status(
                        id,
                        ImageStatus::Error,
                        &format!("Invalid file name: {}", f.name),
                    )
                    .await;
                return;
            }
        };

        let dest = dir.join(&safe_name);
        if let Err(e) = download_file(&client, &store, id, i, total_files, &f.name, &f.url, &dest).await
        {
            error!(file = %f.name, error = %e, "download failed");
            let _ = store
                .update_image_status(
                    id,
                    ImageStatus::Error,
                    &format!("Failed to download {}: {}", f.name, e),
                )
                .await;
            return;
        }
        downloaded.push(safe_name);
    }

    let _ = store.update_image_files(id, &downloaded.join(", ")).await;
    let _ = store.update_image_status(id, ImageStatus::Ready, "").await;
    info!(image = %entry.name, files = downloaded.len(), "catalog image ready");
}

#[allow(clippy::too_many_arguments)]
async fn download_file(
    client: &SafeClient,
    store: &Store,
    id: i64,
    index: usize,
    total_files: usize,
    name: &str,
    url: &str,
    dest: &Path,
) -> Result<(), String> {
    let resp = client.get(url).await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("HTTP {} from {}", resp.status().as_u16(), url));
    }

    let total_bytes = resp.content_length().unwrap_or(0);
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| e.to_string())?;

    let mut written: u64 = 0;
    let mut last_pct: u64 = 0;
    let mut last_update = Instant::now();
    let mut stream = resp.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        file.write_all(&chunk).await.map_err(|e| e.to_string())?;
        written += chunk.len() as u64;

        if total_bytes > 0 {
            let pct = written * 100 / total_bytes;
            if pct != last_pct && last_update.elapsed() > Duration::from_secs(1) {
                last_pct = pct;
                last_update = Instant::now();
                let _ = store
                    .update_image_status(
                        id,
                        ImageStatus::Downloading,
                        &format!("{}/{} {} {}%", index + 1, total_files, name, pct),
                    )
                    .await;
            }
        }
    }

    file.flush().await.map_err(|e| e.to_string())?;
    Ok(())
}
