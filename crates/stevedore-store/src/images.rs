use crate::layers::LayerStore;
use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use stevedore_schema::{Digest, ImageConfig, ImageId};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Mutable per-image state kept next to the immutable config bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct ImageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<ImageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    loaded_at: Option<String>,
    /// blake3 checksum over the other fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

impl ImageMetadata {
    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

/// A stored image as read back from disk.
#[derive(Debug, Clone)]
pub struct Image {
    pub id: ImageId,
    pub config: ImageConfig,
    pub parent: Option<ImageId>,
    pub loaded_at: Option<String>,
}

/// Image configurations addressed by the SHA-256 of their exact bytes.
///
/// Creating an image retains the top layer of its root filesystem so that the
/// whole layer chain stays allocated for as long as the image exists.
pub struct ImageStore {
    layout: StoreLayout,
    layers: Arc<LayerStore>,
}

impl ImageStore {
    pub fn new(layout: StoreLayout, layers: Arc<LayerStore>) -> Self {
        Self { layout, layers }
    }

    pub fn layers(&self) -> &LayerStore {
        &self.layers
    }

    /// Store a raw image configuration. Returns the existing ID if already present.
    pub fn create(&self, config_bytes: &[u8]) -> Result<ImageId, StoreError> {
        let config = ImageConfig::from_json(config_bytes)?;
        let id = ImageConfig::id_of(config_bytes);

        if self.exists(&id) {
            debug!("image {id} already present");
            return Ok(id);
        }

        let top = config.rootfs.chain_id();
        if let Some(top) = &top {
            if !self.layers.exists(top) {
                return Err(StoreError::LayerNotFound(top.to_string()));
            }
            self.layers.retain(top)?;
        }

        // Content last: its presence is what marks the image as existing.
        let written = self
            .write_metadata(
                &id,
                ImageMetadata {
                    loaded_at: Some(chrono::Utc::now().to_rfc3339()),
                    ..Default::default()
                },
            )
            .and_then(|()| {
                self.write_content(&id, config_bytes).inspect_err(|_| {
                    let _ = fs::remove_file(self.layout.image_metadata_path(&id));
                })
            });
        if let Err(e) = written {
            if let Some(top) = &top {
                if let Err(undo) = self.layers.unretain(top) {
                    warn!("failed to release layer {top} after aborted image write: {undo}");
                }
            }
            return Err(e);
        }

        info!("created image {id} with {} layer(s)", config.rootfs.len());
        Ok(id)
    }

    fn write_content(&self, id: &ImageId, bytes: &[u8]) -> Result<(), StoreError> {
        write_atomic(&self.layout.image_content_path(id), bytes)
    }

    fn write_metadata(&self, id: &ImageId, meta: ImageMetadata) -> Result<(), StoreError> {
        let mut meta = meta;
        meta.checksum = Some(meta.compute_checksum()?);
        let content = serde_json::to_string_pretty(&meta)?;
        write_atomic(&self.layout.image_metadata_path(id), content.as_bytes())
    }

    fn metadata(&self, id: &ImageId) -> Result<ImageMetadata, StoreError> {
        let path = self.layout.image_metadata_path(id);
        if !path.exists() {
            return Ok(ImageMetadata::default());
        }
        let content = fs::read_to_string(&path)?;
        let meta: ImageMetadata = serde_json::from_str(&content)?;

        if let Some(ref expected) = meta.checksum {
            let actual = meta.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    hash: id.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(meta)
    }

    /// The exact config bytes of an image, verified against its ID.
    pub fn config_bytes(&self, id: &ImageId) -> Result<Vec<u8>, StoreError> {
        let path = self.layout.image_content_path(id);
        if !path.exists() {
            return Err(StoreError::ImageNotFound(id.to_string()));
        }
        let bytes = fs::read(&path)?;
        let actual = Digest::sha256(&bytes).to_string();
        if actual != id.as_str() {
            return Err(StoreError::IntegrityFailure {
                hash: id.to_string(),
                expected: id.to_string(),
                actual,
            });
        }
        Ok(bytes)
    }

    pub fn get(&self, id: &ImageId) -> Result<Image, StoreError> {
        let bytes = self.config_bytes(id)?;
        let config = ImageConfig::from_json(&bytes)?;
        let meta = self.metadata(id)?;
        Ok(Image {
            id: id.clone(),
            config,
            parent: meta.parent,
            loaded_at: meta.loaded_at,
        })
    }

    pub fn exists(&self, id: &ImageId) -> bool {
        self.layout.image_content_path(id).exists()
    }

    /// Record `parent` as the image `id` was derived from. Both must exist.
    pub fn set_parent(&self, id: &ImageId, parent: &ImageId) -> Result<(), StoreError> {
        for image in [id, parent] {
            if !self.exists(image) {
                return Err(StoreError::ImageNotFound(image.to_string()));
            }
        }
        let mut meta = self.metadata(id)?;
        meta.parent = Some(parent.clone());
        self.write_metadata(id, meta)?;
        debug!("image {id} parent set to {parent}");
        Ok(())
    }

    pub fn parent(&self, id: &ImageId) -> Result<Option<ImageId>, StoreError> {
        if !self.exists(id) {
            return Err(StoreError::ImageNotFound(id.to_string()));
        }
        Ok(self.metadata(id)?.parent)
    }

    pub fn list(&self) -> Result<Vec<ImageId>, StoreError> {
        let dir = self.layout.image_content_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for algo in fs::read_dir(dir)? {
            let algo = algo?;
            if !algo.file_type()?.is_dir() {
                continue;
            }
            let algo_name = algo.file_name().to_string_lossy().into_owned();
            for entry in fs::read_dir(algo.path())? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type()?.is_file() && !name.starts_with('.') {
                    ids.push(ImageId::new(format!("{algo_name}:{name}")));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = dest
        .parent()
        .ok_or_else(|| StoreError::Io(std::io::Error::other("destination has no parent")))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}
