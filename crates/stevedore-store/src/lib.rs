//! Content-addressed stores backing a stevedore image repository.
//!
//! This crate provides the storage layer: `LayerStore` for layer changesets
//! addressed by ChainID with reference-counted `LayerGuard` handles,
//! `ImageStore` for image configurations addressed by the digest of their bytes,
//! `ReferenceStore` for repository:tag bindings, `StoreLayout` for directory
//! structure management, and `verify_store_integrity` for re-hashing everything
//! on disk.

pub mod images;
pub mod integrity;
pub mod layers;
pub mod layout;
pub mod references;

pub use images::{Image, ImageStore};
pub use integrity::{verify_store_integrity, IntegrityFailure, IntegrityReport};
pub use layers::{log_release_metadata, Layer, LayerGuard, LayerRecord, LayerStore};
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use references::ReferenceStore;

use std::path::Path;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// On Linux with ext4 `data=ordered` (the default), renames are usually
/// durable without an explicit dir fsync, but POSIX does not guarantee this.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for '{hash}': expected {expected}, got {actual}")]
    IntegrityFailure {
        hash: String,
        expected: String,
        actual: String,
    },
    #[error("layer not found: {0}")]
    LayerNotFound(String),
    #[error("layer {0} released more times than it was acquired")]
    NotHeld(String),
    #[error("invalid layer data: {0}")]
    InvalidLayer(String),
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("tag {reference} is already bound to {existing}")]
    TagConflict { reference: String, existing: String },
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("schema error: {0}")]
    Schema(#[from] stevedore_schema::SchemaError),
}
