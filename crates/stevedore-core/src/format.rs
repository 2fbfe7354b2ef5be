//! Detection of the archive layout of an extracted tree.

use crate::safepath::ArchiveRoot;
use crate::LoadError;
use stevedore_schema::manifest::{MANIFEST_FILE, OCI_LAYOUT_FILE};
use stevedore_schema::{parse_manifest, ManifestItem, SchemaError};
use tracing::debug;

/// The three archive layouts, in detection priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// An `oci-layout` marker is present; images come from `index.json`.
    Oci,
    /// A `manifest.json` lists the images to load.
    Structured(Vec<ManifestItem>),
    /// Neither marker exists; every top-level directory is an image.
    Legacy,
}

impl Layout {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Oci => "oci",
            Self::Structured(_) => "manifest",
            Self::Legacy => "legacy",
        }
    }
}

/// Inspect `root` and pick its layout.
///
/// A marker or manifest that exists but cannot be read is an error, not a
/// fallback to the next layout.
pub fn detect(root: &ArchiveRoot) -> Result<Layout, LoadError> {
    if root.open_optional(OCI_LAYOUT_FILE)?.is_some() {
        debug!("found {OCI_LAYOUT_FILE}, loading as OCI layout");
        return Ok(Layout::Oci);
    }

    match root.read_optional(MANIFEST_FILE)? {
        Some(bytes) => {
            let items = parse_manifest(&bytes).map_err(|e| match e {
                SchemaError::Serialization(source) => {
                    LoadError::json(root.path().join(MANIFEST_FILE), source)
                }
                other => other.into(),
            })?;
            debug!("{MANIFEST_FILE} lists {} image(s)", items.len());
            Ok(Layout::Structured(items))
        }
        None => {
            debug!("no {OCI_LAYOUT_FILE} or {MANIFEST_FILE}, loading legacy layout");
            Ok(Layout::Legacy)
        }
    }
}
