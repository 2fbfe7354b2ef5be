use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use stevedore_schema::{child_chain_id, ChainId, DiffId, HashingReader};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const LAYER_TAR: &str = "layer.tar";
const LAYER_RECORD: &str = "record.json";

/// Persistent description of a stored layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayerRecord {
    pub chain_id: ChainId,
    pub diff_id: DiffId,
    pub parent: Option<ChainId>,
    /// Size in bytes of the uncompressed changeset.
    pub size: u64,
    /// Number of child layers and images that keep this layer allocated.
    pub retained_by: u32,
    pub created_at: String,
}

/// Layer metadata exposed through handles and returned when a layer is deallocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub chain_id: ChainId,
    pub diff_id: DiffId,
    pub parent: Option<ChainId>,
    pub size: u64,
}

impl From<LayerRecord> for Layer {
    fn from(r: LayerRecord) -> Self {
        Self {
            chain_id: r.chain_id,
            diff_id: r.diff_id,
            parent: r.parent,
            size: r.size,
        }
    }
}

/// Layer store addressed by ChainID.
///
/// Every `get` or `register` hands out a [`LayerGuard`] that counts as one
/// transient holder of the layer. Child layers and images hold layers
/// persistently through `retained_by`. A layer with neither kind of holder is
/// deallocated as soon as its last guard is released, and the deallocation
/// cascades to its parent.
pub struct LayerStore {
    layout: StoreLayout,
    handles: Mutex<HashMap<ChainId, usize>>,
}

impl LayerStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            layout,
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn lock_handles(&self) -> MutexGuard<'_, HashMap<ChainId, usize>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_path(&self, chain_id: &ChainId) -> PathBuf {
        self.layout.layer_dir(chain_id).join(LAYER_RECORD)
    }

    /// Path of the uncompressed changeset of a stored layer.
    pub fn tar_path(&self, chain_id: &ChainId) -> PathBuf {
        self.layout.layer_dir(chain_id).join(LAYER_TAR)
    }

    pub fn exists(&self, chain_id: &ChainId) -> bool {
        self.record_path(chain_id).exists()
    }

    pub fn record(&self, chain_id: &ChainId) -> Result<LayerRecord, StoreError> {
        let path = self.record_path(chain_id);
        if !path.exists() {
            return Err(StoreError::LayerNotFound(chain_id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_record(&self, dir: &Path, record: &LayerRecord) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(record)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(dir.join(LAYER_RECORD))
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    /// Look up a stored layer, acquiring a handle on it.
    pub fn get(&self, chain_id: &ChainId) -> Result<Option<LayerGuard<'_>>, StoreError> {
        let mut handles = self.lock_handles();
        if !self.exists(chain_id) {
            return Ok(None);
        }
        let record = self.record(chain_id)?;
        *handles.entry(chain_id.clone()).or_insert(0) += 1;
        Ok(Some(LayerGuard::new(self, record.into())))
    }

    /// Store an uncompressed layer stream on top of `parent`, acquiring a handle on it.
    ///
    /// The DiffID is computed from the stream and the ChainID derived from it.
    /// If a layer with that ChainID already exists the staged copy is discarded
    /// and a handle on the existing layer is returned.
    pub fn register(
        &self,
        reader: impl Read,
        parent: Option<&ChainId>,
    ) -> Result<LayerGuard<'_>, StoreError> {
        if let Some(parent) = parent {
            if !self.exists(parent) {
                return Err(StoreError::LayerNotFound(parent.to_string()));
            }
        }

        let staged = tempfile::Builder::new()
            .prefix("layer-")
            .tempdir_in(self.layout.staging_dir())?;
        let tar_path = staged.path().join(LAYER_TAR);

        let mut hashing = HashingReader::new(reader);
        {
            let mut file = File::create(&tar_path)?;
            io::copy(&mut hashing, &mut file)?;
            file.sync_all()?;
        }
        let (digest, size) = hashing.finish();
        validate_tar(&tar_path)?;

        let diff_id = DiffId::from(digest);
        let chain_id = child_chain_id(parent, &diff_id);

        let mut handles = self.lock_handles();
        if self.exists(&chain_id) {
            debug!("layer {chain_id} already present, discarding staged copy");
            let record = self.record(&chain_id)?;
            *handles.entry(chain_id).or_insert(0) += 1;
            return Ok(LayerGuard::new(self, record.into()));
        }

        let record = LayerRecord {
            chain_id: chain_id.clone(),
            diff_id,
            parent: parent.cloned(),
            size,
            retained_by: 0,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.write_record(staged.path(), &record)?;

        let dest = self.layout.layer_dir(&chain_id);
        let dest_parent = dest
            .parent()
            .map_or_else(|| self.layout.layers_dir(), Path::to_path_buf);
        fs::create_dir_all(&dest_parent)?;
        fs::rename(staged.path(), &dest)?;
        fsync_dir(&dest_parent)?;

        if let Some(parent) = parent {
            self.adjust_retained(parent, |n| n + 1)?;
        }
        *handles.entry(chain_id.clone()).or_insert(0) += 1;
        info!("registered layer {chain_id} ({size} bytes)");

        Ok(LayerGuard::new(self, record.into()))
    }

    /// Record a persistent holder (an image) of a layer.
    pub fn retain(&self, chain_id: &ChainId) -> Result<(), StoreError> {
        let _handles = self.lock_handles();
        self.adjust_retained(chain_id, |n| n + 1)
    }

    /// Drop a persistent holder of a layer, deallocating it if nothing else holds it.
    pub fn unretain(&self, chain_id: &ChainId) -> Result<Vec<Layer>, StoreError> {
        let handles = self.lock_handles();
        self.adjust_retained(chain_id, |n| n.saturating_sub(1))?;
        self.collect(chain_id, &handles)
    }

    /// Release a handle. Returns the layers that were deallocated as a result.
    pub fn release(&self, guard: LayerGuard<'_>) -> Result<Vec<Layer>, StoreError> {
        guard.release()
    }

    fn release_handle(&self, chain_id: &ChainId) -> Result<Vec<Layer>, StoreError> {
        let mut handles = self.lock_handles();
        let count = handles
            .get_mut(chain_id)
            .ok_or_else(|| StoreError::NotHeld(chain_id.to_string()))?;
        *count -= 1;
        if *count > 0 {
            return Ok(Vec::new());
        }
        handles.remove(chain_id);
        self.collect(chain_id, &handles)
    }

    fn adjust_retained(
        &self,
        chain_id: &ChainId,
        update: impl FnOnce(u32) -> u32,
    ) -> Result<(), StoreError> {
        let mut record = self.record(chain_id)?;
        record.retained_by = update(record.retained_by);
        self.write_record(&self.layout.layer_dir(chain_id), &record)
    }

    /// Deallocate `start` and then its ancestors for as long as nothing holds them.
    fn collect(
        &self,
        start: &ChainId,
        handles: &HashMap<ChainId, usize>,
    ) -> Result<Vec<Layer>, StoreError> {
        let mut released = Vec::new();
        let mut next = Some(start.clone());

        while let Some(chain_id) = next.take() {
            if handles.contains_key(&chain_id) || !self.exists(&chain_id) {
                break;
            }
            let record = self.record(&chain_id)?;
            if record.retained_by > 0 {
                break;
            }

            fs::remove_dir_all(self.layout.layer_dir(&chain_id))?;
            debug!("deallocated layer {chain_id}");
            if let Some(parent) = &record.parent {
                self.adjust_retained(parent, |n| n.saturating_sub(1))?;
                next = Some(parent.clone());
            }
            released.push(record.into());
        }

        Ok(released)
    }

    /// Number of outstanding handles across all layers.
    pub fn active_handles(&self) -> usize {
        self.lock_handles().values().sum()
    }

    pub fn list(&self) -> Result<Vec<ChainId>, StoreError> {
        let dir = self.layout.layers_dir();
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
                if !name.starts_with('.') && entry.path().join(LAYER_RECORD).exists() {
                    ids.push(ChainId::new(format!("{algo_name}:{name}")));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn validate_tar(path: &Path) -> Result<(), StoreError> {
    let invalid = |e: io::Error| StoreError::InvalidLayer(e.to_string());
    let mut archive = tar::Archive::new(File::open(path)?);
    for entry in archive.entries().map_err(invalid)? {
        entry.map_err(invalid)?;
    }
    Ok(())
}

/// Log the layers a release deallocated.
pub fn log_release_metadata(released: &[Layer]) {
    for layer in released {
        info!(
            "layer {} cleaned up (diff {}, {} bytes)",
            layer.chain_id, layer.diff_id, layer.size
        );
    }
}

/// Scoped handle on a stored layer.
///
/// The handle is released exactly once: explicitly through
/// [`release`](Self::release), or on drop with the outcome logged.
pub struct LayerGuard<'s> {
    store: &'s LayerStore,
    layer: Layer,
    released: bool,
}

impl<'s> LayerGuard<'s> {
    fn new(store: &'s LayerStore, layer: Layer) -> Self {
        Self {
            store,
            layer,
            released: false,
        }
    }

    pub fn release(mut self) -> Result<Vec<Layer>, StoreError> {
        self.released = true;
        self.store.release_handle(&self.layer.chain_id)
    }
}

impl fmt::Debug for LayerGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerGuard")
            .field("layer", &self.layer)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Deref for LayerGuard<'_> {
    type Target = Layer;

    fn deref(&self) -> &Layer {
        &self.layer
    }
}

impl Drop for LayerGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.store.release_handle(&self.layer.chain_id) {
            Ok(released) => log_release_metadata(&released),
            Err(e) => warn!("failed to release layer {}: {e}", self.layer.chain_id),
        }
    }
}
