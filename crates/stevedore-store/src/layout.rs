use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout for the stevedore image repository.
///
/// Manages paths for layers, image content and metadata, the reference index,
/// the staging area, and the store version marker. All subdirectories are
/// created lazily on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    #[inline]
    pub fn layers_dir(&self) -> PathBuf {
        self.store_dir().join("layers")
    }

    /// Directory holding one layer, `layers/<algorithm>/<hex>`.
    #[inline]
    pub fn layer_dir(&self, chain_id: &str) -> PathBuf {
        digest_path(&self.layers_dir(), chain_id)
    }

    #[inline]
    pub fn image_content_dir(&self) -> PathBuf {
        self.store_dir().join("images").join("content")
    }

    #[inline]
    pub fn image_metadata_dir(&self) -> PathBuf {
        self.store_dir().join("images").join("metadata")
    }

    /// The raw config bytes of an image.
    #[inline]
    pub fn image_content_path(&self, image_id: &str) -> PathBuf {
        digest_path(&self.image_content_dir(), image_id)
    }

    /// Mutable per-image metadata (parent link, load time).
    #[inline]
    pub fn image_metadata_path(&self, image_id: &str) -> PathBuf {
        digest_path(&self.image_metadata_dir(), image_id)
    }

    #[inline]
    pub fn references_file(&self) -> PathBuf {
        self.store_dir().join("repositories.json")
    }

    /// Temporary staging area for layer registration and archive extraction.
    #[inline]
    pub fn staging_dir(&self) -> PathBuf {
        self.store_dir().join("staging")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.store_dir().join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.layers_dir())?;
        fs::create_dir_all(self.image_content_dir())?;
        fs::create_dir_all(self.image_metadata_dir())?;
        fs::create_dir_all(self.staging_dir())?;

        let version_path = self.store_dir().join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let store_dir = self.store_dir();
            let mut tmp = NamedTempFile::new_in(&store_dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&store_dir)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.store_dir().join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}

/// `base/<algorithm>/<hex>` for an `algorithm:hex` identifier.
fn digest_path(base: &Path, id: &str) -> PathBuf {
    match id.split_once(':') {
        Some((algorithm, hex)) => base.join(algorithm).join(hex),
        None => base.join(id),
    }
}
