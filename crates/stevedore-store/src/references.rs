use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use stevedore_schema::{ImageId, Reference};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

type Bindings = BTreeMap<String, BTreeMap<String, ImageId>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ReferenceFile {
    #[serde(default)]
    repositories: Bindings,
    /// blake3 checksum over `repositories`. `None` for hand-written files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

impl ReferenceFile {
    fn compute_checksum(&self) -> Result<String, StoreError> {
        let json = serde_json::to_string_pretty(&self.repositories)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

/// Persistent `repository:tag -> image` bindings.
///
/// Every mutation rewrites the whole index atomically; an in-process mutex
/// serializes read-modify-write cycles.
pub struct ReferenceStore {
    layout: StoreLayout,
    lock: Mutex<()>,
}

impl ReferenceStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            layout,
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<ReferenceFile, StoreError> {
        let path = self.layout.references_file();
        if !path.exists() {
            return Ok(ReferenceFile::default());
        }
        let content = fs::read_to_string(&path)?;
        let file: ReferenceFile = serde_json::from_str(&content)?;

        if let Some(ref expected) = file.checksum {
            let actual = file.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    hash: path.display().to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(file)
    }

    fn write(&self, mut file: ReferenceFile) -> Result<(), StoreError> {
        file.repositories.retain(|_, tags| !tags.is_empty());
        file.checksum = Some(file.compute_checksum()?);
        let content = serde_json::to_string_pretty(&file)?;

        let dir = self.layout.store_dir();
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.layout.references_file())
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(())
    }

    pub fn get(&self, reference: &Reference) -> Result<Option<ImageId>, StoreError> {
        let file = self.read()?;
        Ok(file
            .repositories
            .get(reference.name())
            .and_then(|tags| tags.get(reference.tag()))
            .cloned())
    }

    /// Bind `reference` to `id`.
    ///
    /// Returns the image the reference pointed at before, if that was a
    /// different image. Without `force`, rebinding to a different image fails
    /// with [`StoreError::TagConflict`].
    pub fn add_tag(
        &self,
        reference: &Reference,
        id: &ImageId,
        force: bool,
    ) -> Result<Option<ImageId>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read()?;

        let tags = file
            .repositories
            .entry(reference.name().to_owned())
            .or_default();
        let previous = match tags.get(reference.tag()) {
            Some(existing) if existing == id => return Ok(None),
            Some(existing) if !force => {
                return Err(StoreError::TagConflict {
                    reference: reference.to_string(),
                    existing: existing.to_string(),
                });
            }
            other => other.cloned(),
        };
        tags.insert(reference.tag().to_owned(), id.clone());

        self.write(file)?;
        debug!("tagged {id} as {reference}");
        Ok(previous)
    }

    /// All bindings, ordered by repository then tag.
    pub fn list(&self) -> Result<Vec<(Reference, ImageId)>, StoreError> {
        let file = self.read()?;
        let mut out = Vec::new();
        for (name, tags) in file.repositories {
            for (tag, id) in tags {
                match Reference::new(&name, &tag) {
                    Ok(reference) => out.push((reference, id)),
                    Err(e) => warn!("skipping malformed reference '{name}:{tag}': {e}"),
                }
            }
        }
        Ok(out)
    }

    pub fn references_for(&self, id: &ImageId) -> Result<Vec<Reference>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|(_, bound)| bound == id)
            .map(|(reference, _)| reference)
            .collect())
    }

    /// Check the stored checksum. Returns the number of bindings.
    pub fn verify(&self) -> Result<usize, StoreError> {
        let file = self.read()?;
        Ok(file.repositories.values().map(BTreeMap::len).sum())
    }
}
