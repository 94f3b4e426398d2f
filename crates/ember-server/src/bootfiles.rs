//! Chainloader store
//!
//! Read-only, in-memory copies of the three prebuilt iPXE binaries the
//! boot chain hands out, loaded once at startup from `<data-dir>/ipxe/`
//! (operator-supplied). Lookup is by exact filename; nothing else is
//! ever served.

use async_trait::async_trait;
use bytes::Bytes;
use ember_tftp::FileProvider;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// The only filenames the store knows
pub const CHAINLOADER_NAMES: [&str; 3] = ["undionly.kpxe", "ipxe.efi", "ipxe-arm64.efi"];

/// Read-only chainloader blob store
#[derive(Debug, Default)]
pub struct ChainloaderStore {
    files: HashMap<&'static str, Bytes>,
}

impl ChainloaderStore {
    /// Load the known binaries from a directory. Missing files are
    /// logged and simply absent: machines of that architecture will get
    /// a TFTP file-not-found until the operator supplies the binary.
    pub async fn load(dir: &Path) -> Self {
        let mut files = HashMap::new();
        for name in CHAINLOADER_NAMES {
            let path = dir.join(name);
            match tokio::fs::read(&path).await {
                Ok(contents) => {
                    info!(name, bytes = contents.len(), "chainloader loaded");
                    files.insert(name, Bytes::from(contents));
                }
                Err(e) => {
                    warn!(name, path = %path.display(), error = %e, "chainloader missing");
                }
            }
        }
        Self { files }
    }

    /// Construct from in-memory blobs (tests)
    pub fn from_blobs(blobs: &[(&'static str, &[u8])]) -> Self {
        let files = blobs
            .iter()
            .filter(|(name, _)| CHAINLOADER_NAMES.contains(name))
            .map(|(name, data)| (*name, Bytes::copy_from_slice(data)))
            .collect();
        Self { files }
    }

    /// Lookup by exact filename
    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.files.get(name).cloned()
    }

    /// How many of the three binaries are present
    pub fn loaded_count(&self) -> usize {
        self.files.len()
    }
}

#[async_trait]
impl FileProvider for ChainloaderStore {
    async fn get_file(&self, name: &str) -> Option<Bytes> {
        self.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("ipxe.efi"), b"efi blob")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("undionly.kpxe"), b"bios blob")
            .await
            .unwrap();
        // ipxe-arm64.efi deliberately absent

        let store = ChainloaderStore::load(dir.path()).await;
        assert_eq!(store.loaded_count(), 2);
        assert_eq!(&store.get("ipxe.efi").unwrap()[..], b"efi blob");
        assert_eq!(&store.get("undionly.kpxe").unwrap()[..], b"bios blob");
        assert!(store.get("ipxe-arm64.efi").is_none());
    }

    #[tokio::test]
    async fn test_only_known_names_served() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("ipxe.efi"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("grubx64.efi"), b"y").await.unwrap();

        let store = ChainloaderStore::load(dir.path()).await;
        assert!(store.get("grubx64.efi").is_none());
        assert!(store.get("../../etc/passwd").is_none());
    }

    #[tokio::test]
    async fn test_file_provider_impl() {
        let store = ChainloaderStore::from_blobs(&[("ipxe.efi", b"blob")]);
        assert!(store.get_file("ipxe.efi").await.is_some());
        assert!(store.get_file("missing").await.is_none());
    }
}
