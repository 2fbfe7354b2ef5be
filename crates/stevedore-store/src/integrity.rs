use crate::images::ImageStore;
use crate::layers::LayerStore;
use crate::layout::StoreLayout;
use crate::references::ReferenceStore;
use crate::StoreError;
use std::fs::File;
use std::sync::Arc;
use stevedore_schema::{child_chain_id, HashingReader};

#[derive(Debug, Default)]
pub struct IntegrityReport {
    pub images_checked: usize,
    pub images_passed: usize,
    pub layers_checked: usize,
    pub layers_passed: usize,
    pub references_checked: usize,
    pub failed: Vec<IntegrityFailure>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
pub struct IntegrityFailure {
    pub hash: String,
    pub reason: String,
}

/// Re-hash every image config and layer changeset in the store, check that
/// each layer's ChainID agrees with its parent and DiffID, and verify the
/// reference index checksum.
pub fn verify_store_integrity(layout: &StoreLayout) -> Result<IntegrityReport, StoreError> {
    let layer_store = Arc::new(LayerStore::new(layout.clone()));
    let image_store = ImageStore::new(layout.clone(), Arc::clone(&layer_store));
    let reference_store = ReferenceStore::new(layout.clone());

    let all_images = image_store.list()?;
    let all_layers = layer_store.list()?;

    let mut report = IntegrityReport {
        images_checked: all_images.len(),
        layers_checked: all_layers.len(),
        ..Default::default()
    };

    for id in &all_images {
        match image_store.get(id) {
            Ok(_) => report.images_passed += 1,
            Err(StoreError::IntegrityFailure { actual, .. }) => {
                report.failed.push(IntegrityFailure {
                    hash: id.to_string(),
                    reason: format!("image config hash mismatch: got {actual}"),
                });
            }
            Err(e) => report.failed.push(IntegrityFailure {
                hash: id.to_string(),
                reason: format!("image read error: {e}"),
            }),
        }
    }

    for chain_id in &all_layers {
        let outcome = layer_store.record(chain_id).and_then(|record| {
            let file = File::open(layer_store.tar_path(chain_id))?;
            let mut hashing = HashingReader::new(file);
            std::io::copy(&mut hashing, &mut std::io::sink())?;
            let (digest, _) = hashing.finish();
            if digest.to_string() != record.diff_id.as_str() {
                return Err(StoreError::IntegrityFailure {
                    hash: chain_id.to_string(),
                    expected: record.diff_id.to_string(),
                    actual: digest.to_string(),
                });
            }
            let derived = child_chain_id(record.parent.as_ref(), &record.diff_id);
            if &derived != chain_id {
                return Err(StoreError::InvalidLayer(format!(
                    "chain id does not match parent and diff id (derived {derived})"
                )));
            }
            Ok(())
        });
        match outcome {
            Ok(()) => report.layers_passed += 1,
            Err(StoreError::IntegrityFailure { actual, .. }) => {
                report.failed.push(IntegrityFailure {
                    hash: chain_id.to_string(),
                    reason: format!("layer diff id mismatch: got {actual}"),
                });
            }
            Err(e) => report.failed.push(IntegrityFailure {
                hash: chain_id.to_string(),
                reason: format!("layer check failed: {e}"),
            }),
        }
    }

    match reference_store.verify() {
        Ok(count) => report.references_checked = count,
        Err(e) => report.failed.push(IntegrityFailure {
            hash: layout.references_file().display().to_string(),
            reason: format!("reference index check failed: {e}"),
        }),
    }

    Ok(report)
}
